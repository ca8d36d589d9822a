use serde::Serialize;

use crate::types::{ActuatorState, Temperatures};

/// Hysteresis band below the setpoint before the heater is called for.
pub const MARGIN_F: f32 = 1.0;

pub const SOLAR_PUMP_OFF_BELOW_F: f32 = 104.0;
pub const SOLAR_PUMP_ON_ABOVE_F: f32 = 105.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ThermostatSetting(i32);

impl ThermostatSetting {
    pub const MIN_F: i32 = 70;
    pub const MAX_F: i32 = 104;
    pub const DEFAULT_F: i32 = 100;

    /// Interprets a persisted byte, falling back to the default when the value
    /// is outside the accepted range.
    pub fn from_stored(raw: u8) -> Self {
        Self::new(i32::from(raw)).unwrap_or_default()
    }

    pub fn new(degrees_f: i32) -> Option<Self> {
        (Self::MIN_F..=Self::MAX_F)
            .contains(&degrees_f)
            .then_some(Self(degrees_f))
    }

    pub fn degrees_f(self) -> i32 {
        self.0
    }

    /// Steps the setting, holding at the range limits.
    pub fn adjusted(self, delta: i32) -> Self {
        Self(self.0.saturating_add(delta).clamp(Self::MIN_F, Self::MAX_F))
    }

    pub fn to_stored(self) -> u8 {
        // Range is a subset of u8.
        self.0 as u8
    }

    fn as_f32(self) -> f32 {
        self.0 as f32
    }
}

impl Default for ThermostatSetting {
    fn default() -> Self {
        Self(Self::DEFAULT_F)
    }
}

pub fn next_heater(spa_f: f32, thermostat: ThermostatSetting, heater_on: bool) -> bool {
    let setpoint = thermostat.as_f32();
    if spa_f < setpoint - MARGIN_F {
        true
    } else if spa_f > setpoint {
        false
    } else {
        heater_on
    }
}

/// First matching rule wins; `heater_on` is the already-updated heater state.
pub fn next_circulation(
    temps: Temperatures,
    thermostat: ThermostatSetting,
    heater_on: bool,
    circulation_on: bool,
) -> bool {
    let setpoint = thermostat.as_f32();
    let Temperatures {
        solar_heater_f,
        spa_f,
    } = temps;

    if heater_on {
        true
    } else if solar_heater_f > spa_f && spa_f < setpoint {
        true
    } else if spa_f > setpoint + MARGIN_F {
        false
    } else if solar_heater_f < spa_f {
        false
    } else {
        circulation_on
    }
}

pub fn next_solar_pump(solar_heater_f: f32, solar_pump_on: bool) -> bool {
    if solar_heater_f < SOLAR_PUMP_OFF_BELOW_F {
        false
    } else if solar_heater_f > SOLAR_PUMP_ON_ABOVE_F {
        true
    } else {
        solar_pump_on
    }
}

/// Applies every rule to `prior` and returns the state to drive this tick.
/// The jet output is not owned by the policy and passes through unchanged.
pub fn evaluate(
    prior: ActuatorState,
    temps: Temperatures,
    thermostat: ThermostatSetting,
) -> ActuatorState {
    let heater_on = next_heater(temps.spa_f, thermostat, prior.heater_on);
    let circulation_on = next_circulation(temps, thermostat, heater_on, prior.circulation_on);
    let solar_pump_on = next_solar_pump(temps.solar_heater_f, prior.solar_pump_on);

    ActuatorState {
        heater_on,
        circulation_on,
        solar_pump_on,
        jet_on: prior.jet_on,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temps(solar_heater_f: f32, spa_f: f32) -> Temperatures {
        Temperatures {
            solar_heater_f,
            spa_f,
        }
    }

    fn setting(degrees_f: i32) -> ThermostatSetting {
        ThermostatSetting::new(degrees_f).unwrap()
    }

    fn all_prior_states() -> Vec<ActuatorState> {
        let mut states = Vec::new();
        for bits in 0..8u8 {
            states.push(ActuatorState {
                heater_on: bits & 1 != 0,
                circulation_on: bits & 2 != 0,
                solar_pump_on: bits & 4 != 0,
                jet_on: false,
            });
        }
        states
    }

    #[test]
    fn heater_turns_on_below_band_regardless_of_prior_state() {
        for prior in all_prior_states() {
            for spa_f in [40.0, 90.0, 98.9] {
                let next = evaluate(prior, temps(80.0, spa_f), setting(100));
                assert!(next.heater_on, "spa {spa_f} prior {prior:?}");
            }
        }
    }

    #[test]
    fn heater_turns_off_above_setpoint_regardless_of_prior_state() {
        for prior in all_prior_states() {
            for spa_f in [100.01, 101.0, 120.0] {
                let next = evaluate(prior, temps(80.0, spa_f), setting(100));
                assert!(!next.heater_on, "spa {spa_f} prior {prior:?}");
            }
        }
    }

    #[test]
    fn heater_holds_inside_dead_band() {
        for spa_f in [99.0, 99.5, 100.0] {
            assert!(next_heater(spa_f, setting(100), true));
            assert!(!next_heater(spa_f, setting(100), false));
        }
    }

    #[test]
    fn heater_implies_circulation() {
        let readings = [-10.0, 60.0, 98.0, 100.0, 101.5, 104.5, 140.0];
        for prior in all_prior_states() {
            for solar in readings {
                for spa in readings {
                    let next = evaluate(prior, temps(solar, spa), setting(100));
                    if next.heater_on {
                        assert!(next.circulation_on, "solar {solar} spa {spa}");
                    }
                }
            }
        }
    }

    #[test]
    fn circulation_harvests_solar_heat_below_setpoint() {
        let prior = ActuatorState::default();

        let next = evaluate(prior, temps(110.0, 90.0), setting(100));

        // Heater is also called for at 90F, but rule 2 alone must match.
        assert!(next_circulation(temps(110.0, 90.0), setting(100), false, false));
        assert!(next.circulation_on);
    }

    #[test]
    fn circulation_rules_follow_priority_order() {
        // Rule 3: spa hot, solar hotter still.
        assert!(!next_circulation(temps(120.0, 101.5), setting(100), false, true));
        // Rule 4: solar colder than spa inside the band.
        assert!(!next_circulation(temps(80.0, 100.5), setting(100), false, true));
        // Rule 5: solar warmer, spa at or above setpoint but within margin.
        assert!(next_circulation(temps(110.0, 100.5), setting(100), false, true));
        assert!(!next_circulation(temps(110.0, 100.5), setting(100), false, false));
        // Rule 5: equal temperatures hold.
        assert!(next_circulation(temps(99.5, 99.5), setting(100), false, true));
    }

    #[test]
    fn solar_pump_follows_its_own_band() {
        for prior in all_prior_states() {
            let hot = evaluate(prior, temps(105.5, 90.0), setting(100));
            assert!(hot.solar_pump_on);

            let cool = evaluate(prior, temps(103.9, 90.0), setting(100));
            assert!(!cool.solar_pump_on);
        }

        for solar in [104.0, 104.5, 105.0] {
            assert!(next_solar_pump(solar, true));
            assert!(!next_solar_pump(solar, false));
        }
    }

    #[test]
    fn heater_sequence_with_dead_band_hold() {
        let mut state = ActuatorState::default();

        state = evaluate(state, temps(80.0, 97.0), setting(100));
        assert!(state.heater_on);

        state = evaluate(state, temps(80.0, 100.5), setting(100));
        assert!(!state.heater_on);

        state = evaluate(state, temps(80.0, 99.5), setting(100));
        assert!(!state.heater_on);
    }

    #[test]
    fn jet_output_passes_through() {
        let prior = ActuatorState {
            jet_on: true,
            ..ActuatorState::default()
        };

        assert!(evaluate(prior, temps(80.0, 90.0), setting(100)).jet_on);
    }

    #[test]
    fn stored_setting_is_validated_on_load() {
        assert_eq!(ThermostatSetting::from_stored(70).degrees_f(), 70);
        assert_eq!(ThermostatSetting::from_stored(104).degrees_f(), 104);
        assert_eq!(ThermostatSetting::from_stored(69).degrees_f(), 100);
        assert_eq!(ThermostatSetting::from_stored(105).degrees_f(), 100);
        assert_eq!(ThermostatSetting::from_stored(0xFF).degrees_f(), 100);
    }

    #[test]
    fn adjustment_holds_at_range_limits() {
        assert_eq!(setting(100).adjusted(1).degrees_f(), 101);
        assert_eq!(setting(104).adjusted(1).degrees_f(), 104);
        assert_eq!(setting(70).adjusted(-1).degrees_f(), 70);
    }
}
