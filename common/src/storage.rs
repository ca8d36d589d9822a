use serde::Serialize;

use crate::error::StorageError;
use crate::policy::ThermostatSetting;
use crate::ports::ByteStore;

pub const STORE_CAPACITY: usize = 4096;
pub const BUCKET_DAYS: usize = 31;
pub const BUCKET_MAX: u8 = 254;

// Version 1 images have the same bucket offsets but no marker, fraction
// cells or reset latch.
pub const LAYOUT_VERSION: u8 = 2;

// One byte per field, so a power cut never tears a value. Buckets live at
// base + day for days 1..=31.
pub const VERSION_ADDR: usize = 0;
pub const THERMOSTAT_ADDR: usize = 1;
pub const CURRENT_DAY_ADDR: usize = 2;
pub const HEAT_INDEX_FRACTION_ADDR: usize = 3;
pub const SOLAR_PUMP_FRACTION_ADDR: usize = 4;
pub const RESET_LATCH_ADDR: usize = 5;

// Heat index fraction (0..1000) in units of 4 so it fits one byte.
pub const HEAT_INDEX_FRACTION_STEP: u32 = 4;

const RESET_LATCH_SET: u8 = 0xA5;

const MAX_STORED_HEAT_INDEX_FRACTION: u8 = 249;
const MAX_STORED_SOLAR_PUMP_FRACTION: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Bucket {
    HeaterMinutes,
    HeatIndex,
    SolarPumpUnits,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Self::HeaterMinutes, Self::HeatIndex, Self::SolarPumpUnits];

    pub fn base_addr(self) -> usize {
        match self {
            Self::HeaterMinutes => 100,
            Self::HeatIndex => 200,
            Self::SolarPumpUnits => 300,
        }
    }

    pub fn addr(self, day: u8) -> usize {
        debug_assert!((1..=BUCKET_DAYS as u8).contains(&day));
        self.base_addr() + usize::from(day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistedState {
    pub thermostat: ThermostatSetting,
    pub current_day: u8,
    pub heat_index_fraction: u32,
    pub solar_pump_fraction: u32,
    pub migrated_from: Option<u8>,
}

pub fn load<S: ByteStore>(store: &mut S) -> Result<PersistedState, StorageError> {
    let version = store.read_byte(VERSION_ADDR)?;
    let migrated_from = if version == LAYOUT_VERSION {
        None
    } else {
        migrate(store)?;
        Some(version)
    };

    let thermostat = ThermostatSetting::from_stored(store.read_byte(THERMOSTAT_ADDR)?);

    let stored_day = store.read_byte(CURRENT_DAY_ADDR)?;
    let current_day = if (1..=BUCKET_DAYS as u8).contains(&stored_day) {
        stored_day
    } else {
        0
    };

    let stored_heat = store.read_byte(HEAT_INDEX_FRACTION_ADDR)?;
    let heat_index_fraction = if stored_heat <= MAX_STORED_HEAT_INDEX_FRACTION {
        u32::from(stored_heat) * HEAT_INDEX_FRACTION_STEP
    } else {
        0
    };

    let stored_solar = store.read_byte(SOLAR_PUMP_FRACTION_ADDR)?;
    let solar_pump_fraction = if stored_solar <= MAX_STORED_SOLAR_PUMP_FRACTION {
        u32::from(stored_solar)
    } else {
        0
    };

    Ok(PersistedState {
        thermostat,
        current_day,
        heat_index_fraction,
        solar_pump_fraction,
        migrated_from,
    })
}

/// Brings an older or unrecognised image up to [`LAYOUT_VERSION`]. Thermostat,
/// day and bucket offsets are unchanged since version 1, so only the newer
/// cells are initialised.
pub fn migrate<S: ByteStore>(store: &mut S) -> Result<(), StorageError> {
    store.write_byte(HEAT_INDEX_FRACTION_ADDR, 0)?;
    store.write_byte(SOLAR_PUMP_FRACTION_ADDR, 0)?;
    store.write_byte(RESET_LATCH_ADDR, 0)?;
    // Marker last: a crash before this point reruns the migration.
    store.write_byte(VERSION_ADDR, LAYOUT_VERSION)
}

/// Clears every bucket and starts accounting on `day`.
pub fn provision<S: ByteStore>(store: &mut S, day: u8) -> Result<(), StorageError> {
    for bucket in Bucket::ALL {
        for slot in 1..=BUCKET_DAYS as u8 {
            store.write_byte(bucket.addr(slot), 0)?;
        }
    }
    store.write_byte(CURRENT_DAY_ADDR, day)?;
    store.write_byte(HEAT_INDEX_FRACTION_ADDR, 0)?;
    store.write_byte(SOLAR_PUMP_FRACTION_ADDR, 0)?;
    store.write_byte(VERSION_ADDR, LAYOUT_VERSION)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    NotRequested,
    Reset,
    AlreadyApplied,
}

/// Runs [`provision`] once per period the reset request stays asserted. The
/// latch is set after the buckets are cleared and released on the first boot
/// without the request.
pub fn apply_reset_request<S: ByteStore>(
    store: &mut S,
    requested: bool,
    day: u8,
) -> Result<ResetOutcome, StorageError> {
    let latched = store.read_byte(RESET_LATCH_ADDR)? == RESET_LATCH_SET;
    match (requested, latched) {
        (false, false) => Ok(ResetOutcome::NotRequested),
        (false, true) => {
            store.write_byte(RESET_LATCH_ADDR, 0)?;
            Ok(ResetOutcome::NotRequested)
        }
        (true, true) => Ok(ResetOutcome::AlreadyApplied),
        (true, false) => {
            provision(store, day)?;
            store.write_byte(RESET_LATCH_ADDR, RESET_LATCH_SET)?;
            Ok(ResetOutcome::Reset)
        }
    }
}

pub fn store_thermostat<S: ByteStore>(
    store: &mut S,
    thermostat: ThermostatSetting,
) -> Result<(), StorageError> {
    store.write_byte(THERMOSTAT_ADDR, thermostat.to_stored())
}

pub fn store_current_day<S: ByteStore>(store: &mut S, day: u8) -> Result<(), StorageError> {
    store.write_byte(CURRENT_DAY_ADDR, day)
}

pub fn store_fractions<S: ByteStore>(
    store: &mut S,
    heat_index_fraction: u32,
    solar_pump_fraction: u32,
) -> Result<(), StorageError> {
    let heat = (heat_index_fraction / HEAT_INDEX_FRACTION_STEP)
        .min(u32::from(MAX_STORED_HEAT_INDEX_FRACTION)) as u8;
    let solar = solar_pump_fraction.min(u32::from(MAX_STORED_SOLAR_PUMP_FRACTION)) as u8;

    store.update_byte(HEAT_INDEX_FRACTION_ADDR, heat)?;
    store.update_byte(SOLAR_PUMP_FRACTION_ADDR, solar)
}

/// Adds one to the slot for `day`, holding at [`BUCKET_MAX`].
pub fn increment_bucket<S: ByteStore>(
    store: &mut S,
    bucket: Bucket,
    day: u8,
) -> Result<u8, StorageError> {
    let addr = bucket.addr(day);
    let current = store.read_byte(addr)?;
    if current >= BUCKET_MAX {
        return Ok(current);
    }
    store.write_byte(addr, current + 1)?;
    Ok(current + 1)
}

pub fn read_bucket<S: ByteStore>(store: &mut S, bucket: Bucket) -> Result<Vec<u8>, StorageError> {
    (1..=BUCKET_DAYS as u8)
        .map(|day| store.read_byte(bucket.addr(day)))
        .collect()
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    bytes: Vec<u8>,
}

impl MemoryStore {
    pub fn erased() -> Self {
        Self {
            bytes: vec![0xFF; STORE_CAPACITY],
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl ByteStore for MemoryStore {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read_byte(&mut self, offset: usize) -> Result<u8, StorageError> {
        self.bytes
            .get(offset)
            .copied()
            .ok_or(StorageError::OutOfBounds(offset))
    }

    fn write_byte(&mut self, offset: usize, value: u8) -> Result<(), StorageError> {
        let cell = self
            .bytes
            .get_mut(offset)
            .ok_or(StorageError::OutOfBounds(offset))?;
        *cell = value;
        Ok(())
    }
}
