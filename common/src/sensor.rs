use crate::error::SensorError;
use crate::types::SensorId;

/// Degrees Celsius per LSB of the 12-bit temperature register.
pub const CELSIUS_PER_LSB: f32 = 0.0625;

/// Decodes the 12-bit two's-complement temperature held in the upper bits of a
/// big-endian register pair.
pub fn raw_to_celsius(msb: u8, lsb: u8) -> f32 {
    // Arithmetic shift keeps the sign of negative readings.
    let counts = i16::from_be_bytes([msb, lsb]) >> 4;
    f32::from(counts) * CELSIUS_PER_LSB
}

pub fn celsius_to_fahrenheit(temp_c: f32) -> f32 {
    temp_c * 1.8 + 32.0
}

pub fn decode_transfer(sensor: SensorId, bytes: &[u8]) -> Result<f32, SensorError> {
    match bytes {
        [msb, lsb] => Ok(celsius_to_fahrenheit(raw_to_celsius(*msb, *lsb))),
        _ => Err(SensorError::ShortRead(sensor, bytes.len())),
    }
}
