pub mod config;
pub mod controller;
pub mod error;
pub mod policy;
pub mod ports;
pub mod sensor;
pub mod storage;
pub mod telemetry;
pub mod topics;
pub mod types;

pub use config::{ControllerConfig, HardwareConfig, NetworkConfig, RuntimeConfig};
pub use controller::{BootReport, ControllerState, SpaController, TickReport};
pub use error::{ActuatorError, ClockError, SensorError, StorageError};
pub use policy::ThermostatSetting;
pub use ports::{ActuatorSink, ByteStore, ClockSource, TemperatureReader};
pub use storage::{Bucket, MemoryStore, ResetOutcome};
pub use topics::*;
pub use types::{ActuatorState, ClockReading, SensorId, SpaCommand, SpaSnapshot, Temperatures};
