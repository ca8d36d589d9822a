use crate::{
    config::ControllerConfig,
    error::{ActuatorError, ClockError, SensorError, StorageError},
    policy::{self, ThermostatSetting},
    ports::{ActuatorSink, ByteStore, ClockSource, TemperatureReader},
    storage::{self, Bucket},
    telemetry::{DailyTelemetry, FlushReport, MinuteSample},
    types::{ActuatorState, SensorId, SpaCommand, SpaSnapshot, Temperatures},
};

pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq)]
struct Reading {
    value_f: f32,
    at_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    thermostat: ThermostatSetting,
    actuators: ActuatorState,
    solar_heater: Option<Reading>,
    spa: Option<Reading>,
    sensors_stale: bool,
    last_flush_minute: Option<u8>,
    telemetry: DailyTelemetry,
}

impl ControllerState {
    pub fn thermostat(&self) -> ThermostatSetting {
        self.thermostat
    }

    pub fn actuators(&self) -> ActuatorState {
        self.actuators
    }

    pub fn sensors_stale(&self) -> bool {
        self.sensors_stale
    }

    pub fn last_flush_minute(&self) -> Option<u8> {
        self.last_flush_minute
    }

    pub fn telemetry(&self) -> &DailyTelemetry {
        &self.telemetry
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BootReport {
    pub migrated_from: Option<u8>,
    pub storage_error: Option<StorageError>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub sensor_errors: Vec<SensorError>,
    /// No usable reading for one of the sensors: the rules were not evaluated
    /// and the heater was held off.
    pub policy_skipped: bool,
    pub clock_error: Option<ClockError>,
    pub flush: Option<FlushReport>,
    pub actuator_errors: Vec<ActuatorError>,
}

impl TickReport {
    pub fn is_degraded(&self) -> bool {
        !self.sensor_errors.is_empty()
            || self.policy_skipped
            || self.clock_error.is_some()
            || !self.actuator_errors.is_empty()
            || self
                .flush
                .as_ref()
                .is_some_and(|flush| !flush.errors.is_empty())
    }
}

// Bucket slots as last read from the store. `None` in a field means the read
// failed and is retried on the next snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
struct BucketView {
    heater_minutes: Option<Vec<u8>>,
    heat_index: Option<Vec<u8>>,
    solar_pump_units: Option<Vec<u8>>,
}

impl BucketView {
    fn is_complete(&self) -> bool {
        self.heater_minutes.is_some()
            && self.heat_index.is_some()
            && self.solar_pump_units.is_some()
    }
}

#[derive(Debug)]
pub struct SpaController<S> {
    config: ControllerConfig,
    store: S,
    state: ControllerState,
    buckets: Option<BucketView>,
}

impl<S: ByteStore> SpaController<S> {
    pub fn load(mut config: ControllerConfig, mut store: S) -> (Self, BootReport) {
        config.sanitize();

        let mut report = BootReport::default();
        let persisted = match storage::load(&mut store) {
            Ok(persisted) => persisted,
            Err(err) => {
                report.storage_error = Some(err);
                storage::PersistedState::default()
            }
        };
        report.migrated_from = persisted.migrated_from;

        let state = ControllerState {
            thermostat: persisted.thermostat,
            actuators: ActuatorState::default(),
            solar_heater: None,
            spa: None,
            sensors_stale: true,
            last_flush_minute: None,
            telemetry: DailyTelemetry::restore(&persisted),
        };

        (
            Self {
                config,
                store,
                state,
                buckets: None,
            },
            report,
        )
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// One pass of the control loop: read, decide, drive, and (once per clock
    /// minute) account.
    pub fn tick<R, C, A>(
        &mut self,
        sensors: &mut R,
        clock: &mut C,
        sink: &mut A,
        now_ms: u64,
    ) -> TickReport
    where
        R: TemperatureReader,
        C: ClockSource,
        A: ActuatorSink,
    {
        let mut report = TickReport::default();

        let temps = self.read_temperatures(sensors, now_ms, &mut report);
        match temps {
            Some(temps) => {
                self.state.actuators =
                    policy::evaluate(self.state.actuators, temps, self.state.thermostat);
            }
            None => {
                report.policy_skipped = true;
                self.state.actuators.heater_on = false;
                // The solar pump only depends on the collector.
                if let Some(solar) = self.state.solar_heater {
                    self.state.actuators.solar_pump_on =
                        policy::next_solar_pump(solar.value_f, self.state.actuators.solar_pump_on);
                }
            }
        }

        self.apply_actuators(sink, &mut report);

        match clock.now() {
            Ok(reading) if self.state.last_flush_minute != Some(reading.minute()) => {
                let sample = MinuteSample {
                    day: reading.day(),
                    heater_on: self.state.actuators.heater_on,
                    solar_pump_on: self.state.actuators.solar_pump_on,
                    solar_heater_f: self.state.solar_heater.map(|solar| solar.value_f),
                };
                report.flush = Some(self.state.telemetry.record_minute(&mut self.store, sample));
                self.state.last_flush_minute = Some(reading.minute());
                self.buckets = None;
            }
            Ok(_) => {}
            Err(err) => report.clock_error = Some(err),
        }

        report
    }

    /// Handles one request from the network boundary. A thermostat change is
    /// kept in memory even when persisting it fails.
    pub fn apply_command(&mut self, command: SpaCommand) -> Result<(), StorageError> {
        match command {
            SpaCommand::ThermostatUp => self.adjust_thermostat(1),
            SpaCommand::ThermostatDown => self.adjust_thermostat(-1),
            SpaCommand::ToggleJet => {
                self.state.actuators.jet_on = !self.state.actuators.jet_on;
                Ok(())
            }
        }
    }

    pub fn adjust_thermostat(&mut self, delta: i32) -> Result<(), StorageError> {
        self.state.thermostat = self.state.thermostat.adjusted(delta);
        storage::store_thermostat(&mut self.store, self.state.thermostat)
    }

    /// A bucket that cannot be read is reported as `None`; the rest of the
    /// snapshot is unaffected.
    pub fn snapshot(&mut self) -> SpaSnapshot {
        let buckets = self.bucket_view();
        SpaSnapshot {
            version: FIRMWARE_VERSION,
            thermostat_f: self.state.thermostat.degrees_f(),
            solar_heater_f: self.state.solar_heater.map(|solar| solar.value_f),
            spa_f: self.state.spa.map(|reading| reading.value_f),
            sensors_stale: self.state.sensors_stale,
            actuators: self.state.actuators,
            current_day: self.state.telemetry.current_day(),
            current_minute: self.state.last_flush_minute,
            heat_index_fraction: self.state.telemetry.heat_index_fraction(),
            solar_pump_fraction: self.state.telemetry.solar_pump_fraction(),
            heater_minutes: buckets.heater_minutes,
            heat_index: buckets.heat_index,
            solar_pump_units: buckets.solar_pump_units,
        }
    }

    // Buckets only change on a flush, so the store is read once per minute at
    // most.
    fn bucket_view(&mut self) -> BucketView {
        if let Some(cached) = &self.buckets {
            return cached.clone();
        }

        let view = BucketView {
            heater_minutes: storage::read_bucket(&mut self.store, Bucket::HeaterMinutes).ok(),
            heat_index: storage::read_bucket(&mut self.store, Bucket::HeatIndex).ok(),
            solar_pump_units: storage::read_bucket(&mut self.store, Bucket::SolarPumpUnits).ok(),
        };
        if view.is_complete() {
            self.buckets = Some(view.clone());
        }
        view
    }

    fn read_temperatures<R: TemperatureReader>(
        &mut self,
        sensors: &mut R,
        now_ms: u64,
        report: &mut TickReport,
    ) -> Option<Temperatures> {
        let timeout_ms = self.config.sensor_stale_timeout_ms;
        let mut stale = false;

        for sensor in [SensorId::SolarHeater, SensorId::Spa] {
            let result = sensors.read_fahrenheit(sensor).and_then(|value_f| {
                if self.config.is_plausible_temp(value_f) {
                    Ok(value_f)
                } else {
                    Err(SensorError::Implausible { sensor, value_f })
                }
            });

            let slot = match sensor {
                SensorId::SolarHeater => &mut self.state.solar_heater,
                SensorId::Spa => &mut self.state.spa,
            };
            match result {
                Ok(value_f) => *slot = Some(Reading { value_f, at_ms: now_ms }),
                Err(err) => {
                    stale = true;
                    report.sensor_errors.push(err);
                }
            }

            // Last good value is reused until it ages out.
            if slot.is_some_and(|reading| now_ms.saturating_sub(reading.at_ms) >= timeout_ms) {
                *slot = None;
            }
        }

        let temps = match (self.state.solar_heater, self.state.spa) {
            (Some(solar_heater), Some(spa)) => Some(Temperatures {
                solar_heater_f: solar_heater.value_f,
                spa_f: spa.value_f,
            }),
            _ => None,
        };
        self.state.sensors_stale = stale || temps.is_none();
        temps
    }

    fn apply_actuators<A: ActuatorSink>(&self, sink: &mut A, report: &mut TickReport) {
        let ActuatorState {
            heater_on,
            circulation_on,
            solar_pump_on,
            jet_on,
        } = self.state.actuators;

        let results = [
            sink.set_heater(heater_on),
            sink.set_circulation(circulation_on),
            sink.set_solar_pump(solar_pump_on),
            sink.set_jet(jet_on),
        ];
        report
            .actuator_errors
            .extend(results.into_iter().filter_map(Result::err));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::storage::{MemoryStore, BUCKET_DAYS, CURRENT_DAY_ADDR, THERMOSTAT_ADDR};
    use crate::types::ClockReading;

    #[derive(Default)]
    struct FakeSensors {
        solar_heater: VecDeque<Result<f32, SensorError>>,
        spa: VecDeque<Result<f32, SensorError>>,
    }

    impl FakeSensors {
        fn push(&mut self, solar_heater_f: f32, spa_f: f32) {
            self.solar_heater.push_back(Ok(solar_heater_f));
            self.spa.push_back(Ok(spa_f));
        }
    }

    impl TemperatureReader for FakeSensors {
        fn read_fahrenheit(&mut self, sensor: SensorId) -> Result<f32, SensorError> {
            let queue = match sensor {
                SensorId::SolarHeater => &mut self.solar_heater,
                SensorId::Spa => &mut self.spa,
            };
            queue
                .pop_front()
                .unwrap_or(Err(SensorError::NoResponse(sensor)))
        }
    }

    struct FakeClock(Result<ClockReading, ClockError>);

    impl FakeClock {
        fn at(day: u32, minute: u32) -> Self {
            Self(ClockReading::new(day, minute))
        }

        fn set(&mut self, day: u32, minute: u32) {
            self.0 = ClockReading::new(day, minute);
        }
    }

    impl ClockSource for FakeClock {
        fn now(&mut self) -> Result<ClockReading, ClockError> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        applied: Vec<ActuatorState>,
        pending: ActuatorState,
        fail_jet: bool,
    }

    impl ActuatorSink for RecordingSink {
        fn set_heater(&mut self, on: bool) -> Result<(), ActuatorError> {
            self.pending.heater_on = on;
            Ok(())
        }

        fn set_circulation(&mut self, on: bool) -> Result<(), ActuatorError> {
            self.pending.circulation_on = on;
            Ok(())
        }

        fn set_solar_pump(&mut self, on: bool) -> Result<(), ActuatorError> {
            self.pending.solar_pump_on = on;
            Ok(())
        }

        fn set_jet(&mut self, on: bool) -> Result<(), ActuatorError> {
            if self.fail_jet {
                return Err(ActuatorError::new("jet", "relay driver fault"));
            }
            self.pending.jet_on = on;
            self.applied.push(self.pending);
            Ok(())
        }
    }

    /// Memory store whose reads or writes can be switched off.
    struct FlakyStore {
        inner: MemoryStore,
        fail_reads: bool,
        fail_writes: bool,
    }

    impl FlakyStore {
        fn provisioned(day: u8) -> Self {
            let mut inner = MemoryStore::erased();
            storage::provision(&mut inner, day).unwrap();
            Self {
                inner,
                fail_reads: false,
                fail_writes: false,
            }
        }
    }

    impl ByteStore for FlakyStore {
        fn capacity(&self) -> usize {
            self.inner.capacity()
        }

        fn read_byte(&mut self, offset: usize) -> Result<u8, StorageError> {
            if self.fail_reads {
                return Err(StorageError::Read {
                    offset,
                    reason: "bus fault".to_string(),
                });
            }
            self.inner.read_byte(offset)
        }

        fn write_byte(&mut self, offset: usize, value: u8) -> Result<(), StorageError> {
            if self.fail_writes {
                return Err(StorageError::Write {
                    offset,
                    reason: "write not committed".to_string(),
                });
            }
            self.inner.write_byte(offset, value)
        }
    }

    fn controller(day: u8) -> SpaController<FlakyStore> {
        let (controller, report) =
            SpaController::load(ControllerConfig::default(), FlakyStore::provisioned(day));
        assert_eq!(report, BootReport::default());
        controller
    }

    fn slot(controller: &mut SpaController<FlakyStore>, bucket: Bucket, day: u8) -> u8 {
        controller.store.inner.read_byte(bucket.addr(day)).unwrap()
    }

    #[test]
    fn heater_follows_setpoint_with_dead_band() {
        let mut controller = controller(1);
        let mut sensors = FakeSensors::default();
        let mut clock = FakeClock::at(1, 0);
        let mut sink = RecordingSink::default();

        sensors.push(80.0, 97.0);
        controller.tick(&mut sensors, &mut clock, &mut sink, 0);
        assert!(controller.state().actuators().heater_on);
        assert!(controller.state().actuators().circulation_on);

        sensors.push(80.0, 100.5);
        controller.tick(&mut sensors, &mut clock, &mut sink, 1_000);
        assert!(!controller.state().actuators().heater_on);

        sensors.push(80.0, 99.5);
        controller.tick(&mut sensors, &mut clock, &mut sink, 2_000);
        assert!(!controller.state().actuators().heater_on);

        assert_eq!(sink.applied.len(), 3);
        assert!(sink.applied[0].heater_on);
        assert!(!sink.applied[2].heater_on);
    }

    #[test]
    fn solar_heat_turns_on_circulation() {
        let mut controller = controller(1);
        let mut sensors = FakeSensors::default();
        let mut sink = RecordingSink::default();

        sensors.push(110.0, 90.0);
        controller.tick(&mut sensors, &mut FakeClock::at(1, 0), &mut sink, 0);

        let actuators = controller.state().actuators();
        assert!(actuators.circulation_on);
        assert!(actuators.solar_pump_on);
        assert_eq!(sink.applied, vec![actuators]);
    }

    #[test]
    fn telemetry_flushes_once_per_clock_minute() {
        let mut controller = controller(3);
        let mut sensors = FakeSensors::default();
        let mut clock = FakeClock::at(3, 10);
        let mut sink = RecordingSink::default();

        for tick in 0..5u64 {
            sensors.push(80.0, 90.0);
            let report = controller.tick(&mut sensors, &mut clock, &mut sink, tick * 200);
            assert_eq!(report.flush.is_some(), tick == 0);
        }
        clock.set(3, 11);
        sensors.push(80.0, 90.0);
        assert!(controller
            .tick(&mut sensors, &mut clock, &mut sink, 1_000)
            .flush
            .is_some());

        assert_eq!(slot(&mut controller, Bucket::HeaterMinutes, 3), 2);
        assert_eq!(controller.state().last_flush_minute(), Some(11));
    }

    #[test]
    fn day_rollover_moves_bucket_writes() {
        let mut controller = controller(5);
        let mut sensors = FakeSensors::default();
        let mut clock = FakeClock::at(5, 58);
        let mut sink = RecordingSink::default();

        for (day, minute) in [(5, 58), (5, 59), (6, 0)] {
            clock.set(day, minute);
            sensors.push(80.0, 90.0);
            let report = controller.tick(&mut sensors, &mut clock, &mut sink, 0);
            let rolled = report.flush.unwrap().rolled_over_to;
            assert_eq!(rolled, (day == 6).then_some(6));
        }

        assert_eq!(slot(&mut controller, Bucket::HeaterMinutes, 5), 2);
        assert_eq!(slot(&mut controller, Bucket::HeaterMinutes, 6), 1);
        assert_eq!(controller.state().telemetry().current_day(), 6);
        assert_eq!(controller.store.inner.read_byte(CURRENT_DAY_ADDR).unwrap(), 6);
    }

    #[test]
    fn clock_failure_skips_telemetry_but_not_control() {
        let mut controller = controller(5);
        let mut sensors = FakeSensors::default();
        let mut clock = FakeClock(Err(ClockError::Unavailable));
        let mut sink = RecordingSink::default();

        sensors.push(80.0, 90.0);
        let report = controller.tick(&mut sensors, &mut clock, &mut sink, 0);

        assert_eq!(report.clock_error, Some(ClockError::Unavailable));
        assert_eq!(report.flush, None);
        assert!(report.is_degraded());
        assert!(sink.applied[0].heater_on);
        assert_eq!(controller.state().last_flush_minute(), None);

        // Implausible clock values are rejected before reaching the core.
        clock.set(40, 5);
        sensors.push(80.0, 90.0);
        let report = controller.tick(&mut sensors, &mut clock, &mut sink, 1_000);
        assert_eq!(report.clock_error, Some(ClockError::InvalidDay(40)));
        assert_eq!(slot(&mut controller, Bucket::HeaterMinutes, 5), 0);
    }

    #[test]
    fn sensor_failure_reuses_last_good_reading() {
        let mut controller = controller(1);
        let mut sensors = FakeSensors::default();
        let mut clock = FakeClock::at(1, 0);
        let mut sink = RecordingSink::default();

        sensors.push(80.0, 97.0);
        controller.tick(&mut sensors, &mut clock, &mut sink, 0);

        sensors.solar_heater.push_back(Ok(82.0));
        sensors.spa.push_back(Err(SensorError::NoResponse(SensorId::Spa)));
        let report = controller.tick(&mut sensors, &mut clock, &mut sink, 1_000);

        assert_eq!(report.sensor_errors, vec![SensorError::NoResponse(SensorId::Spa)]);
        assert!(!report.policy_skipped);
        assert!(controller.state().sensors_stale());
        assert!(controller.state().actuators().heater_on);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.spa_f, Some(97.0));
        assert_eq!(snapshot.solar_heater_f, Some(82.0));
        assert!(snapshot.sensors_stale);
    }

    #[test]
    fn implausible_reading_is_treated_as_failure() {
        let mut controller = controller(1);
        let mut sensors = FakeSensors::default();
        let mut sink = RecordingSink::default();

        sensors.push(80.0, f32::NAN);
        let report = controller.tick(&mut sensors, &mut FakeClock::at(1, 0), &mut sink, 0);

        assert!(report.policy_skipped);
        assert_eq!(report.sensor_errors.len(), 1);
        assert_eq!(controller.snapshot().spa_f, None);
    }

    #[test]
    fn no_reading_at_boot_keeps_outputs_off() {
        let mut controller = controller(1);
        let mut sensors = FakeSensors::default();
        let mut sink = RecordingSink::default();

        let report = controller.tick(&mut sensors, &mut FakeClock::at(1, 0), &mut sink, 0);

        assert!(report.policy_skipped);
        assert_eq!(report.sensor_errors.len(), 2);
        assert_eq!(sink.applied, vec![ActuatorState::default()]);
        // The minute is still accounted; there is just no heat index input.
        assert_eq!(report.flush.unwrap().heat_index_units, 0);
    }

    #[test]
    fn solar_pump_runs_without_spa_reading() {
        let mut controller = controller(1);
        let mut sensors = FakeSensors::default();
        let mut sink = RecordingSink::default();

        sensors.solar_heater.push_back(Ok(110.0));
        let report = controller.tick(&mut sensors, &mut FakeClock::at(1, 0), &mut sink, 0);

        assert!(report.policy_skipped);
        assert_eq!(
            sink.applied,
            vec![ActuatorState {
                solar_pump_on: true,
                ..ActuatorState::default()
            }]
        );
        assert_eq!(controller.state().telemetry().heat_index_fraction(), 110);
    }

    #[test]
    fn aged_out_reading_holds_heater_off() {
        let mut controller = controller(1);
        let mut sensors = FakeSensors::default();
        let mut clock = FakeClock::at(1, 0);
        let mut sink = RecordingSink::default();

        sensors.push(80.0, 90.0);
        controller.tick(&mut sensors, &mut clock, &mut sink, 0);
        assert!(controller.state().actuators().heater_on);

        let timeout = controller.config().sensor_stale_timeout_ms;
        let report = controller.tick(&mut sensors, &mut clock, &mut sink, timeout - 1);
        assert!(!report.policy_skipped);
        assert!(controller.state().actuators().heater_on);

        let report = controller.tick(&mut sensors, &mut clock, &mut sink, timeout);
        assert!(report.policy_skipped);
        assert!(!controller.state().actuators().heater_on);
    }

    #[test]
    fn storage_failure_loses_telemetry_only() {
        let mut controller = controller(2);
        let mut sensors = FakeSensors::default();
        let mut sink = RecordingSink::default();
        controller.store.fail_writes = true;

        sensors.push(120.0, 90.0);
        let report = controller.tick(&mut sensors, &mut FakeClock::at(2, 30), &mut sink, 0);

        let flush = report.flush.clone().unwrap();
        assert!(!flush.errors.is_empty());
        assert!(report.is_degraded());
        assert_eq!(sink.applied.len(), 1);
        assert!(sink.applied[0].heater_on);
        assert_eq!(slot(&mut controller, Bucket::HeaterMinutes, 2), 0);
        assert_eq!(controller.state().telemetry().heat_index_fraction(), 120);
    }

    #[test]
    fn actuator_errors_are_reported() {
        let mut controller = controller(2);
        let mut sensors = FakeSensors::default();
        let mut sink = RecordingSink {
            fail_jet: true,
            ..RecordingSink::default()
        };

        sensors.push(80.0, 101.0);
        let report = controller.tick(&mut sensors, &mut FakeClock::at(2, 30), &mut sink, 0);

        assert_eq!(report.actuator_errors.len(), 1);
        assert_eq!(report.actuator_errors[0].output, "jet");
    }

    #[test]
    fn thermostat_commands_persist_immediately() {
        let mut controller = controller(1);

        controller.apply_command(SpaCommand::ThermostatUp).unwrap();
        controller.apply_command(SpaCommand::ThermostatUp).unwrap();
        controller.apply_command(SpaCommand::ThermostatDown).unwrap();

        assert_eq!(controller.state().thermostat().degrees_f(), 101);
        assert_eq!(controller.store.inner.read_byte(THERMOSTAT_ADDR).unwrap(), 101);

        let (reloaded, _) =
            SpaController::load(ControllerConfig::default(), controller.store.inner.clone());
        assert_eq!(reloaded.state().thermostat().degrees_f(), 101);
    }

    #[test]
    fn thermostat_change_survives_failed_persist() {
        let mut controller = controller(1);
        controller.store.fail_writes = true;

        let result = controller.apply_command(SpaCommand::ThermostatDown);

        assert!(matches!(result, Err(StorageError::Write { offset: 1, .. })));
        assert_eq!(controller.state().thermostat().degrees_f(), 99);
    }

    #[test]
    fn jet_toggle_drives_relay_on_next_tick() {
        let mut controller = controller(1);
        let mut sensors = FakeSensors::default();
        let mut sink = RecordingSink::default();

        controller.apply_command(SpaCommand::ToggleJet).unwrap();
        sensors.push(80.0, 101.0);
        controller.tick(&mut sensors, &mut FakeClock::at(1, 0), &mut sink, 0);

        assert!(sink.applied[0].jet_on);
        controller.apply_command(SpaCommand::ToggleJet).unwrap();
        assert!(!controller.state().actuators().jet_on);
    }

    #[test]
    fn snapshot_reports_buckets_and_fractions() {
        let mut controller = controller(7);
        let mut sensors = FakeSensors::default();
        let mut sink = RecordingSink::default();

        sensors.push(150.0, 90.0);
        controller.tick(&mut sensors, &mut FakeClock::at(7, 42), &mut sink, 0);

        let snapshot = controller.snapshot();
        let mut heater = vec![0; BUCKET_DAYS];
        heater[6] = 1;

        assert_eq!(snapshot.thermostat_f, 100);
        assert_eq!(snapshot.current_day, 7);
        assert_eq!(snapshot.current_minute, Some(42));
        assert_eq!(snapshot.heat_index_fraction, 150);
        assert_eq!(snapshot.heater_minutes, Some(heater));
        assert_eq!(snapshot.heat_index, Some(vec![0; BUCKET_DAYS]));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["heaterOn"], true);
        assert_eq!(json["tThermostat"], 100);
        assert_eq!(json["heaterCB"][6], 1);
    }

    #[test]
    fn unreadable_store_boots_with_defaults() {
        let mut store = FlakyStore::provisioned(1);
        store.fail_reads = true;

        let (mut controller, report) = SpaController::load(ControllerConfig::default(), store);

        assert!(report.storage_error.is_some());
        assert_eq!(controller.state().thermostat().degrees_f(), 100);
        assert_eq!(controller.state().telemetry().current_day(), 0);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.thermostat_f, 100);
        assert_eq!(snapshot.heater_minutes, None);
        assert_eq!(snapshot.solar_pump_units, None);
    }

    #[test]
    fn snapshot_reuses_buckets_until_next_flush() {
        let mut controller = controller(4);
        let mut sensors = FakeSensors::default();
        let mut clock = FakeClock::at(4, 10);
        let mut sink = RecordingSink::default();

        sensors.push(80.0, 90.0);
        controller.tick(&mut sensors, &mut clock, &mut sink, 0);
        let first = controller.snapshot();

        // Served from memory while the store is unreadable.
        controller.store.fail_reads = true;
        sensors.push(80.0, 90.0);
        controller.tick(&mut sensors, &mut clock, &mut sink, 1_000);
        let cached = controller.snapshot();
        assert_eq!(cached.heater_minutes, first.heater_minutes);

        // A flush invalidates the cache; the failed reads only blank the
        // buckets.
        clock.set(4, 11);
        sensors.push(81.0, 90.0);
        controller.tick(&mut sensors, &mut clock, &mut sink, 2_000);
        let degraded = controller.snapshot();
        assert_eq!(degraded.heater_minutes, None);
        assert_eq!(degraded.heat_index, None);
        assert_eq!(degraded.solar_heater_f, Some(81.0));
        assert!(degraded.actuators.heater_on);

        controller.store.fail_reads = false;
        let mut heater = vec![0; BUCKET_DAYS];
        heater[3] = 1;
        assert_eq!(controller.snapshot().heater_minutes, Some(heater));
    }
}
