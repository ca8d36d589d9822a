use thiserror::Error;

use crate::types::SensorId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("{0} sensor did not respond")]
    NoResponse(SensorId),
    #[error("{0} sensor returned a short transfer ({1} bytes)")]
    ShortRead(SensorId, usize),
    #[error("{sensor} sensor reading {value_f}F is outside the plausible range")]
    Implausible { sensor: SensorId, value_f: f32 },
    #[error("{0} sensor bus error: {1}")]
    Bus(SensorId, String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("offset {0} is outside the store")]
    OutOfBounds(usize),
    #[error("read of offset {offset} failed: {reason}")]
    Read { offset: usize, reason: String },
    #[error("write of offset {offset} failed: {reason}")]
    Write { offset: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("clock is not available")]
    Unavailable,
    #[error("clock reported day {0}, expected 1..=31")]
    InvalidDay(u32),
    #[error("clock reported minute {0}, expected 0..=59")]
    InvalidMinute(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to drive {output} output: {reason}")]
pub struct ActuatorError {
    pub output: &'static str,
    pub reason: String,
}

impl ActuatorError {
    pub fn new(output: &'static str, reason: impl Into<String>) -> Self {
        Self {
            output,
            reason: reason.into(),
        }
    }
}
