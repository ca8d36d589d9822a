use std::fmt;

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::ClockError;
use crate::storage::BUCKET_DAYS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SensorId {
    SolarHeater,
    Spa,
}

impl SensorId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SolarHeater => "solar heater",
            Self::Spa => "spa",
        }
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActuatorState {
    #[serde(rename = "heaterOn")]
    pub heater_on: bool,
    #[serde(rename = "circOn")]
    pub circulation_on: bool,
    #[serde(rename = "solarPumpOn")]
    pub solar_pump_on: bool,
    #[serde(rename = "jetOn")]
    pub jet_on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperatures {
    pub solar_heater_f: f32,
    pub spa_f: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    day: u8,
    minute: u8,
}

impl ClockReading {
    pub fn new(day: u32, minute: u32) -> Result<Self, ClockError> {
        if !(1..=BUCKET_DAYS as u32).contains(&day) {
            return Err(ClockError::InvalidDay(day));
        }
        if minute > 59 {
            return Err(ClockError::InvalidMinute(minute));
        }
        Ok(Self {
            day: day as u8,
            minute: minute as u8,
        })
    }

    pub fn from_datetime<T: Datelike + Timelike>(now: &T) -> Result<Self, ClockError> {
        Self::new(now.day(), now.minute())
    }

    pub fn day(self) -> u8 {
        self.day
    }

    pub fn minute(self) -> u8 {
        self.minute
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpaCommand {
    ThermostatUp,
    ThermostatDown,
    ToggleJet,
}

impl SpaCommand {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "thermostatUp" => Some(Self::ThermostatUp),
            "thermostatDown" => Some(Self::ThermostatDown),
            "toggleJet" => Some(Self::ToggleJet),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ThermostatUp => "thermostatUp",
            Self::ThermostatDown => "thermostatDown",
            Self::ToggleJet => "toggleJet",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpaSnapshot {
    pub version: &'static str,
    #[serde(rename = "tThermostat")]
    pub thermostat_f: i32,
    #[serde(rename = "tAvailable")]
    pub solar_heater_f: Option<f32>,
    #[serde(rename = "tSpa")]
    pub spa_f: Option<f32>,
    #[serde(rename = "sensorsStale")]
    pub sensors_stale: bool,
    #[serde(flatten)]
    pub actuators: ActuatorState,
    #[serde(rename = "clockDay")]
    pub current_day: u8,
    #[serde(rename = "clockMinute")]
    pub current_minute: Option<u8>,
    #[serde(rename = "heatIndexFraction")]
    pub heat_index_fraction: u32,
    #[serde(rename = "solarPumpFraction")]
    pub solar_pump_fraction: u32,
    #[serde(rename = "heaterCB")]
    pub heater_minutes: Option<Vec<u8>>,
    #[serde(rename = "heatIndexCB")]
    pub heat_index: Option<Vec<u8>>,
    #[serde(rename = "solarPumpCB")]
    pub solar_pump_units: Option<Vec<u8>>,
}
