use serde::{Deserialize, Serialize};

// Each control loop iteration feeds the 30 s device task watchdog once.
pub const MAX_TICK_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub tick_interval_ms: u64,
    pub state_publish_interval_ms: u64,
    pub sensor_stale_timeout_ms: u64,
    pub min_valid_temp_f: f32,
    pub max_valid_temp_f: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            state_publish_interval_ms: 10_000,
            sensor_stale_timeout_ms: 300_000,
            min_valid_temp_f: -40.0,
            max_valid_temp_f: 260.0,
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        self.tick_interval_ms = self.tick_interval_ms.clamp(100, MAX_TICK_INTERVAL_MS);
        self.state_publish_interval_ms = self.state_publish_interval_ms.clamp(1_000, 3_600_000);
        self.sensor_stale_timeout_ms = self.sensor_stale_timeout_ms.clamp(5_000, 3_600_000);

        if !self.min_valid_temp_f.is_finite()
            || !self.max_valid_temp_f.is_finite()
            || self.min_valid_temp_f >= self.max_valid_temp_f
        {
            let defaults = Self::default();
            self.min_valid_temp_f = defaults.min_valid_temp_f;
            self.max_valid_temp_f = defaults.max_valid_temp_f;
        }
    }

    pub fn is_plausible_temp(&self, temp_f: f32) -> bool {
        temp_f.is_finite() && (self.min_valid_temp_f..=self.max_valid_temp_f).contains(&temp_f)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardwareConfig {
    pub solar_sensor_addr: u8,
    pub spa_sensor_addr: u8,
    pub i2c_sda_pin: i32,
    pub i2c_scl_pin: i32,
    pub heat_pin: i32,
    pub circulation_pin: i32,
    pub jet_pin: i32,
    pub solar_pump_pin: i32,
    pub i2c_timeout_ms: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            solar_sensor_addr: 0x48,
            spa_sensor_addr: 0x49,
            i2c_sda_pin: 21,
            i2c_scl_pin: 22,
            heat_pin: 25,
            circulation_pin: 26,
            jet_pin: 27,
            solar_pump_pin: 32,
            i2c_timeout_ms: 50,
        }
    }
}

impl HardwareConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        // 7-bit I2C address space, reserved ranges excluded.
        if !(0x08..=0x77).contains(&self.solar_sensor_addr) {
            self.solar_sensor_addr = defaults.solar_sensor_addr;
        }
        if !(0x08..=0x77).contains(&self.spa_sensor_addr)
            || self.spa_sensor_addr == self.solar_sensor_addr
        {
            self.spa_sensor_addr = defaults.spa_sensor_addr;
        }

        for (pin, default) in [
            (&mut self.i2c_sda_pin, defaults.i2c_sda_pin),
            (&mut self.i2c_scl_pin, defaults.i2c_scl_pin),
            (&mut self.heat_pin, defaults.heat_pin),
            (&mut self.circulation_pin, defaults.circulation_pin),
            (&mut self.jet_pin, defaults.jet_pin),
            (&mut self.solar_pump_pin, defaults.solar_pump_pin),
        ] {
            if *pin < 0 {
                *pin = default;
            }
        }

        self.i2c_timeout_ms = self.i2c_timeout_ms.clamp(5, 1_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            http_port: 8084,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    pub timezone: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            hardware: HardwareConfig::default(),
            network: NetworkConfig::default(),
            timezone: "America/Los_Angeles".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.controller.sanitize();
        self.hardware.sanitize();

        if self.network.http_port == 0 {
            self.network.http_port = NetworkConfig::default().http_port;
        }
        if self.timezone.trim().is_empty() {
            self.timezone = Self::default().timezone;
        }
    }
}
