use crate::error::{ActuatorError, ClockError, SensorError, StorageError};
use crate::types::{ClockReading, SensorId};

pub trait TemperatureReader {
    fn read_fahrenheit(&mut self, sensor: SensorId) -> Result<f32, SensorError>;
}

pub trait ClockSource {
    fn now(&mut self) -> Result<ClockReading, ClockError>;
}

// A successful write is durable on return and never disturbs other offsets.
pub trait ByteStore {
    fn capacity(&self) -> usize;

    fn read_byte(&mut self, offset: usize) -> Result<u8, StorageError>;

    fn write_byte(&mut self, offset: usize, value: u8) -> Result<(), StorageError>;

    /// Writes only when the stored value differs.
    fn update_byte(&mut self, offset: usize, value: u8) -> Result<(), StorageError> {
        if self.read_byte(offset)? != value {
            self.write_byte(offset, value)?;
        }
        Ok(())
    }
}

pub trait ActuatorSink {
    fn set_heater(&mut self, on: bool) -> Result<(), ActuatorError>;

    fn set_circulation(&mut self, on: bool) -> Result<(), ActuatorError>;

    fn set_solar_pump(&mut self, on: bool) -> Result<(), ActuatorError>;

    fn set_jet(&mut self, on: bool) -> Result<(), ActuatorError>;
}
