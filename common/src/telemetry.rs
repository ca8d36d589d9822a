use crate::error::StorageError;
use crate::ports::ByteStore;
use crate::storage::{self, Bucket, PersistedState, BUCKET_MAX};

// Heat index is the per-minute solar heater sum over this scale; solar pump
// usage is counted in quarter hours.
pub const HEAT_INDEX_SCALE: u32 = 1_000;
pub const SOLAR_PUMP_SCALE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinuteSample {
    pub day: u8,
    pub heater_on: bool,
    pub solar_pump_on: bool,
    pub solar_heater_f: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    pub rolled_over_to: Option<u8>,
    pub heat_index_units: u32,
    pub solar_pump_units: u32,
    pub errors: Vec<StorageError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DailyTelemetry {
    current_day: u8,
    heat_index_fraction: u32,
    solar_pump_fraction: u32,
}

impl DailyTelemetry {
    pub fn restore(persisted: &PersistedState) -> Self {
        Self {
            current_day: persisted.current_day,
            heat_index_fraction: persisted.heat_index_fraction,
            solar_pump_fraction: persisted.solar_pump_fraction,
        }
    }

    pub fn current_day(&self) -> u8 {
        self.current_day
    }

    pub fn heat_index_fraction(&self) -> u32 {
        self.heat_index_fraction
    }

    pub fn solar_pump_fraction(&self) -> u32 {
        self.solar_pump_fraction
    }

    /// Accounts one elapsed minute. Storage failures are returned in the
    /// report; the in-memory state always advances.
    pub fn record_minute<S: ByteStore>(
        &mut self,
        store: &mut S,
        sample: MinuteSample,
    ) -> FlushReport {
        let mut report = FlushReport::default();

        if sample.day != self.current_day {
            self.current_day = sample.day;
            report.rolled_over_to = Some(sample.day);
            // Persisted before any bucket write for the new day.
            if let Err(err) = storage::store_current_day(store, sample.day) {
                report.errors.push(err);
            }
        }
        let day = self.current_day;

        if sample.heater_on {
            if let Err(err) = storage::increment_bucket(store, Bucket::HeaterMinutes, day) {
                report.errors.push(err);
            }
        }

        if let Some(solar_heater_f) = sample.solar_heater_f {
            // Truncates toward zero; readings below 0F add nothing.
            self.heat_index_fraction = self
                .heat_index_fraction
                .saturating_add(solar_heater_f.max(0.0) as u32);
        }
        let units = self.heat_index_fraction / HEAT_INDEX_SCALE;
        self.heat_index_fraction %= HEAT_INDEX_SCALE;
        report.heat_index_units = units;
        // The slot saturates long before this many increments.
        for _ in 0..units.min(u32::from(BUCKET_MAX)) {
            if let Err(err) = storage::increment_bucket(store, Bucket::HeatIndex, day) {
                report.errors.push(err);
            }
        }

        if sample.solar_pump_on {
            self.solar_pump_fraction += 1;
        }
        while self.solar_pump_fraction >= SOLAR_PUMP_SCALE {
            self.solar_pump_fraction -= SOLAR_PUMP_SCALE;
            report.solar_pump_units += 1;
            if let Err(err) = storage::increment_bucket(store, Bucket::SolarPumpUnits, day) {
                report.errors.push(err);
            }
        }

        if let Err(err) =
            storage::store_fractions(store, self.heat_index_fraction, self.solar_pump_fraction)
        {
            report.errors.push(err);
        }

        report
    }
}
