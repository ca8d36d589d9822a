pub const TOPIC_CONTROLLER_STATE: &str = "spa/controller/state";
pub const TOPIC_CONTROLLER_STATUS: &str = "spa/controller/status";

pub const TOPIC_CMD_THERMOSTAT: &str = "spa/cmnd/thermostat";
pub const TOPIC_CMD_JET: &str = "spa/cmnd/jet";

/// Maps an MQTT command publish to the command it requests.
///
/// `spa/cmnd/thermostat` takes `up` or `down`; `spa/cmnd/jet` takes `toggle`.
/// Either topic also accepts a bare command name such as `thermostatUp`.
pub fn command_for(topic: &str, payload: &str) -> Option<crate::SpaCommand> {
    use crate::SpaCommand;

    let payload = payload.trim();
    match (topic, payload.to_ascii_lowercase().as_str()) {
        (TOPIC_CMD_THERMOSTAT, "up") => Some(SpaCommand::ThermostatUp),
        (TOPIC_CMD_THERMOSTAT, "down") => Some(SpaCommand::ThermostatDown),
        (TOPIC_CMD_JET, "toggle") => Some(SpaCommand::ToggleJet),
        (TOPIC_CMD_THERMOSTAT | TOPIC_CMD_JET, _) => SpaCommand::from_name(payload),
        _ => None,
    }
}
