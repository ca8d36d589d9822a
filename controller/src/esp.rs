use core::convert::TryInto;
use std::{
    sync::{
        mpsc::{self, Receiver, SyncSender},
        Arc, Mutex, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{Datelike, Utc};
use chrono_tz::Tz;
use embedded_svc::{
    http::Method,
    io::Write,
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::TickType,
    gpio::{AnyIOPin, AnyOutputPin, Output, PinDriver},
    i2c::{I2cConfig, I2cDriver, I2C0},
    units::FromValueType,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    sntp::EspSntp,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::Serialize;

use spa_common::{
    config::{HardwareConfig, NetworkConfig},
    sensor,
    storage::{self, ResetOutcome, STORE_CAPACITY},
    topics, ActuatorError, ActuatorSink, ByteStore, ClockError, ClockReading, ClockSource,
    RuntimeConfig, SensorError, SensorId, SpaCommand, SpaController, SpaSnapshot, StorageError,
    TemperatureReader, TickReport, TOPIC_CMD_JET, TOPIC_CMD_THERMOSTAT, TOPIC_CONTROLLER_STATE,
};

const NVS_CONFIG_NAMESPACE: &str = "spa";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const NVS_STORE_NAMESPACE: &str = "spa_eeprom";
const MAX_MQTT_PAYLOAD_BYTES: usize = 64;
const COMMAND_QUEUE_DEPTH: usize = 8;
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
/// Any wall clock earlier than this has not been set by SNTP yet.
const MIN_SYNCED_YEAR: i32 = 2024;

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta name="viewport" content="width=device-width, initial-scale=1"><title>Spa</title></head>
<body>
<h1>Spa</h1>
<pre id="state">loading...</pre>
<button onclick="send('thermostatDown')">-1&deg;F</button>
<button onclick="send('thermostatUp')">+1&deg;F</button>
<button onclick="send('toggleJet')">Jets</button>
<script>
async function refresh() {
  const res = await fetch('/api/state');
  document.getElementById('state').textContent = JSON.stringify(await res.json(), null, 2);
}
async function send(action) {
  await fetch('/api/preferences?action=' + action, { method: 'POST' });
  setTimeout(refresh, 1500);
}
refresh();
setInterval(refresh, 10000);
</script>
</body>
</html>
"#;

type SharedSnapshot = Arc<Mutex<Option<SpaSnapshot>>>;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut runtime = load_runtime_config(&nvs_partition).unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    ensure_wifi_defaults(&mut runtime);
    runtime.sanitize();

    let Peripherals { modem, i2c0, .. } = Peripherals::take()?;

    // Relays first so every output is off before anything else can fail.
    let relays = RelayBank::new(&runtime.hardware).context("relay bring-up failed")?;
    let sensors = I2cSensors::new(i2c0, &runtime.hardware).context("I2C bring-up failed")?;

    let wifi = match connect_wifi(modem, sys_loop, nvs_partition.clone(), &runtime.network) {
        Ok(wifi) => Some(wifi),
        Err(err) => {
            warn!("wifi unavailable, running without network: {err:#}");
            None
        }
    };

    let _sntp = EspSntp::new_default().context("failed to start SNTP")?;
    info!("SNTP initialized");
    let mut clock = SntpClock::new(&runtime.timezone);

    let mut store = NvsByteStore::new(&nvs_partition)?;
    let day = clock.now().map(ClockReading::day).unwrap_or(0);
    match storage::apply_reset_request(&mut store, cfg!(feature = "reset_buckets"), day)
        .context("failed to reset daily buckets")?
    {
        ResetOutcome::Reset => warn!("daily buckets reset, accounting starts on day {day}"),
        ResetOutcome::AlreadyApplied => {
            warn!("bucket reset already applied, flash without reset_buckets to re-arm it")
        }
        ResetOutcome::NotRequested => {}
    }

    let (controller, boot) = SpaController::load(runtime.controller.clone(), store);
    if let Some(version) = boot.migrated_from {
        info!("persistent layout migrated from marker {version:#04x}");
    }
    if let Some(err) = boot.storage_error {
        warn!("persistent state unreadable, running on defaults: {err}");
    }
    info!(
        "controller restored: thermostat={}F day={}",
        controller.state().thermostat().degrees_f(),
        controller.state().telemetry().current_day()
    );

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;

    let (command_tx, command_rx) = mpsc::sync_channel(COMMAND_QUEUE_DEPTH);
    let snapshot: SharedSnapshot = Arc::new(Mutex::new(None));

    let mqtt = if wifi.is_some() {
        match create_mqtt_client(&runtime.network) {
            Ok((client, conn)) => {
                let client = Arc::new(Mutex::new(client));
                if let Err(err) = subscribe_topics(&client) {
                    warn!("mqtt subscribe failed: {err:#}");
                }
                spawn_mqtt_receiver(conn, client.clone(), command_tx.clone());
                Some(client)
            }
            Err(err) => {
                warn!("mqtt client unavailable: {err:#}");
                None
            }
        }
    } else {
        None
    };

    spawn_control_loop(
        controller,
        ControlIo {
            sensors,
            clock,
            relays,
        },
        command_rx,
        snapshot.clone(),
        mqtt,
    )?;

    let server = create_http_server(command_tx, snapshot)?;

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn ensure_wifi_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }
}

fn load_runtime_config(partition: &EspDefaultNvsPartition) -> anyhow::Result<RuntimeConfig> {
    let nvs = EspNvs::new(partition.clone(), NVS_CONFIG_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; 2048];

    match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
        Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
        None => Ok(RuntimeConfig::default()),
    }
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    if network.wifi_ssid.trim().is_empty() {
        return Err(anyhow!("wifi credentials missing"));
    }

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected on attempt {attempt}");
                last_err = None;
                break;
            }
            Err(err) => {
                warn!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS} failed: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    match last_err {
        None => Ok(esp_wifi),
        Some(err) => {
            let _ = wifi.stop();
            Err(anyhow!("all wifi connect attempts failed: {err:#}"))
        }
    }
}

/// Two-byte register reads from the solar heater and spa sensors.
struct I2cSensors {
    driver: I2cDriver<'static>,
    solar_heater_addr: u8,
    spa_addr: u8,
    timeout_ticks: u32,
}

impl I2cSensors {
    fn new(i2c: I2C0, hardware: &HardwareConfig) -> anyhow::Result<Self> {
        let sda = unsafe { AnyIOPin::new(hardware.i2c_sda_pin) };
        let scl = unsafe { AnyIOPin::new(hardware.i2c_scl_pin) };
        let config = I2cConfig::new().baudrate(100.kHz().into());
        let driver = I2cDriver::new(i2c, sda, scl, &config)?;

        info!(
            "I2C sensors on SDA{}/SCL{}: solar heater {:#04x}, spa {:#04x}",
            hardware.i2c_sda_pin,
            hardware.i2c_scl_pin,
            hardware.solar_sensor_addr,
            hardware.spa_sensor_addr
        );

        Ok(Self {
            driver,
            solar_heater_addr: hardware.solar_sensor_addr,
            spa_addr: hardware.spa_sensor_addr,
            timeout_ticks: TickType::new_millis(u64::from(hardware.i2c_timeout_ms)).ticks(),
        })
    }
}

impl TemperatureReader for I2cSensors {
    fn read_fahrenheit(&mut self, sensor: SensorId) -> Result<f32, SensorError> {
        let addr = match sensor {
            SensorId::SolarHeater => self.solar_heater_addr,
            SensorId::Spa => self.spa_addr,
        };

        let mut transfer = [0_u8; 2];
        self.driver
            .read(addr, &mut transfer, self.timeout_ticks)
            .map_err(|err| {
                if err.code() == esp_idf_svc::sys::ESP_FAIL {
                    SensorError::NoResponse(sensor)
                } else {
                    SensorError::Bus(sensor, err.to_string())
                }
            })?;

        sensor::decode_transfer(sensor, &transfer)
    }
}

/// Relay outputs. The relay boards switch on a low level.
struct RelayBank {
    heater: PinDriver<'static, AnyOutputPin, Output>,
    circulation: PinDriver<'static, AnyOutputPin, Output>,
    solar_pump: PinDriver<'static, AnyOutputPin, Output>,
    jet: PinDriver<'static, AnyOutputPin, Output>,
}

impl RelayBank {
    fn new(hardware: &HardwareConfig) -> anyhow::Result<Self> {
        let mut bank = Self {
            heater: relay_pin(hardware.heat_pin)?,
            circulation: relay_pin(hardware.circulation_pin)?,
            solar_pump: relay_pin(hardware.solar_pump_pin)?,
            jet: relay_pin(hardware.jet_pin)?,
        };

        for (name, result) in [
            ("heater", bank.set_heater(false)),
            ("circulation", bank.set_circulation(false)),
            ("solar pump", bank.set_solar_pump(false)),
            ("jet", bank.set_jet(false)),
        ] {
            result.with_context(|| format!("failed to switch {name} relay off"))?;
        }
        Ok(bank)
    }
}

fn relay_pin(pin: i32) -> anyhow::Result<PinDriver<'static, AnyOutputPin, Output>> {
    let mut driver = unsafe { PinDriver::output(AnyOutputPin::new(pin)) }
        .with_context(|| format!("relay output unavailable on GPIO{pin}"))?;
    driver.set_high()?;
    Ok(driver)
}

fn drive_relay(
    pin: &mut PinDriver<'static, AnyOutputPin, Output>,
    output: &'static str,
    on: bool,
) -> Result<(), ActuatorError> {
    let result = if on { pin.set_low() } else { pin.set_high() };
    result.map_err(|err| ActuatorError::new(output, err.to_string()))
}

impl ActuatorSink for RelayBank {
    fn set_heater(&mut self, on: bool) -> Result<(), ActuatorError> {
        drive_relay(&mut self.heater, "heater", on)
    }

    fn set_circulation(&mut self, on: bool) -> Result<(), ActuatorError> {
        drive_relay(&mut self.circulation, "circulation", on)
    }

    fn set_solar_pump(&mut self, on: bool) -> Result<(), ActuatorError> {
        drive_relay(&mut self.solar_pump, "solar pump", on)
    }

    fn set_jet(&mut self, on: bool) -> Result<(), ActuatorError> {
        drive_relay(&mut self.jet, "jet", on)
    }
}

/// Byte store on NVS, one `u8` entry per offset. Offsets never written read
/// back as erased.
struct NvsByteStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsByteStore {
    fn new(partition: &EspDefaultNvsPartition) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(partition.clone(), NVS_STORE_NAMESPACE, true)
            .context("failed to open persistent store namespace")?;
        Ok(Self { nvs })
    }

    fn key(offset: usize) -> String {
        format!("b{offset}")
    }
}

impl ByteStore for NvsByteStore {
    fn capacity(&self) -> usize {
        STORE_CAPACITY
    }

    fn read_byte(&mut self, offset: usize) -> Result<u8, StorageError> {
        if offset >= STORE_CAPACITY {
            return Err(StorageError::OutOfBounds(offset));
        }
        self.nvs
            .get_u8(&Self::key(offset))
            .map(|value| value.unwrap_or(0xFF))
            .map_err(|err| StorageError::Read {
                offset,
                reason: err.to_string(),
            })
    }

    fn write_byte(&mut self, offset: usize, value: u8) -> Result<(), StorageError> {
        if offset >= STORE_CAPACITY {
            return Err(StorageError::OutOfBounds(offset));
        }
        // set_u8 commits before returning.
        self.nvs
            .set_u8(&Self::key(offset), value)
            .map_err(|err| StorageError::Write {
                offset,
                reason: err.to_string(),
            })
    }
}

struct SntpClock {
    tz: Tz,
}

impl SntpClock {
    fn new(timezone: &str) -> Self {
        let tz = timezone.parse::<Tz>().unwrap_or_else(|_| {
            warn!("unknown timezone {timezone:?}, using UTC");
            Tz::UTC
        });
        Self { tz }
    }
}

impl ClockSource for SntpClock {
    fn now(&mut self) -> Result<ClockReading, ClockError> {
        let now = Utc::now();
        if now.year() < MIN_SYNCED_YEAR {
            return Err(ClockError::Unavailable);
        }
        ClockReading::from_datetime(&now.with_timezone(&self.tz))
    }
}

struct ControlIo {
    sensors: I2cSensors,
    clock: SntpClock,
    relays: RelayBank,
}

fn spawn_control_loop(
    mut controller: SpaController<NvsByteStore>,
    mut io: ControlIo,
    commands: Receiver<SpaCommand>,
    snapshot: SharedSnapshot,
    mqtt: Option<Arc<Mutex<EspMqttClient<'static>>>>,
) -> anyhow::Result<()> {
    let tick_interval = Duration::from_millis(controller.config().tick_interval_ms);
    let publish_interval_ms = controller.config().state_publish_interval_ms;

    thread::Builder::new()
        .name("control-loop".into())
        .stack_size(12 * 1024)
        .spawn(move || {
            if let Err(err) = add_current_task_to_watchdog() {
                warn!("failed to register control loop with watchdog: {err:#}");
            }

            let mut last_state_publish_ms: Option<u64> = None;

            loop {
                feed_watchdog();
                let now_ms = monotonic_ms();

                let report =
                    controller.tick(&mut io.sensors, &mut io.clock, &mut io.relays, now_ms);
                log_tick_report(&report);

                if let Ok(command) = commands.try_recv() {
                    match controller.apply_command(command) {
                        Ok(()) => info!("command applied: {}", command.as_str()),
                        Err(err) => warn!(
                            "command {} applied but not persisted: {err}",
                            command.as_str()
                        ),
                    }
                }

                let current = controller.snapshot();
                let publish_due = last_state_publish_ms
                    .map_or(true, |last| now_ms.saturating_sub(last) >= publish_interval_ms);
                if publish_due {
                    last_state_publish_ms = Some(now_ms);
                    if current.heater_minutes.is_none() {
                        warn!("telemetry buckets unreadable, reporting without them");
                    }
                    if let Some(mqtt) = &mqtt {
                        if let Err(err) = publish_state(mqtt, &current) {
                            warn!("state publish failed: {err:#}");
                        }
                    }
                }
                if let Ok(mut shared) = snapshot.lock() {
                    *shared = Some(current);
                }

                thread::sleep(tick_interval);
            }
        })
        .context("failed to spawn control loop thread")?;
    Ok(())
}

fn log_tick_report(report: &TickReport) {
    for err in &report.sensor_errors {
        warn!("sensor: {err}");
    }
    if report.policy_skipped {
        warn!("no usable temperature reading, heater held off");
    }
    for err in &report.actuator_errors {
        warn!("actuator: {err}");
    }
    if let Some(flush) = &report.flush {
        if let Some(day) = flush.rolled_over_to {
            info!("telemetry rolled over to day {day}");
        }
        for err in &flush.errors {
            warn!("telemetry write lost: {err}");
        }
    }
}

fn publish_state(
    mqtt: &Arc<Mutex<EspMqttClient<'static>>>,
    snapshot: &SpaSnapshot,
) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(snapshot)?;
    let mut client = mqtt
        .lock()
        .map_err(|_| anyhow!("mqtt client lock poisoned"))?;
    client.publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, &payload)?;
    Ok(())
}

fn create_mqtt_client(
    network: &NetworkConfig,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port);

    let conf = MqttClientConfiguration {
        client_id: Some("spa-controller"),
        username: if network.mqtt_user.is_empty() {
            None
        } else {
            Some(network.mqtt_user.as_str())
        },
        password: if network.mqtt_pass.is_empty() {
            None
        } else {
            Some(network.mqtt_pass.as_str())
        },
        ..Default::default()
    };

    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

fn subscribe_topics(mqtt: &Arc<Mutex<EspMqttClient<'static>>>) -> anyhow::Result<()> {
    let mut mqtt = mqtt
        .lock()
        .map_err(|_| anyhow!("mqtt client lock poisoned"))?;
    for topic in [TOPIC_CMD_THERMOSTAT, TOPIC_CMD_JET] {
        mqtt.subscribe(topic, QoS::AtMostOnce)?;
    }
    Ok(())
}

fn spawn_mqtt_receiver(
    mut conn: EspMqttConnection,
    mqtt: Arc<Mutex<EspMqttClient<'static>>>,
    commands: SyncSender<SpaCommand>,
) {
    let spawned = thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(8 * 1024)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => {
                    let EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details,
                        ..
                    } = event.payload()
                    else {
                        continue;
                    };
                    // Only complete payloads carry a command.
                    if !matches!(details, Details::Complete) {
                        continue;
                    }
                    if data.len() > MAX_MQTT_PAYLOAD_BYTES {
                        warn!(
                            "dropping oversized MQTT payload on topic {} ({} bytes)",
                            topic,
                            data.len()
                        );
                        continue;
                    }

                    let Ok(message) = core::str::from_utf8(data) else {
                        continue;
                    };
                    if let Some(command) = topics::command_for(topic, message) {
                        if let Err(err) = commands.try_send(command) {
                            warn!("mqtt command {} dropped: {err}", command.as_str());
                        }
                    }
                }
                Err(err) => {
                    warn!("mqtt receive loop error: {err:?}");
                    thread::sleep(Duration::from_secs(2));
                    if let Err(sub_err) = subscribe_topics(&mqtt) {
                        warn!("mqtt re-subscribe failed: {sub_err:#}");
                    }
                }
            }
        });

    if let Err(err) = spawned {
        warn!("failed to spawn mqtt receiver thread: {err}");
    }
}

type HttpRequest<'a, 'b> =
    esp_idf_svc::http::server::Request<&'a mut esp_idf_svc::http::server::EspHttpConnection<'b>>;

fn create_http_server(
    commands: SyncSender<SpaCommand>,
    snapshot: SharedSnapshot,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 10 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
        req.into_ok_response()?.write_all(INDEX_HTML.as_bytes())?;
        Ok(())
    })?;

    {
        let snapshot = snapshot.clone();
        server.fn_handler("/api/state", Method::Get, move |req| {
            match current_snapshot(&snapshot) {
                Some(current) => write_json(req, 200, &current),
                None => write_error(req, 503, "Controller is starting"),
            }
        })?;
    }

    for (uri, command) in [
        ("/api/thermostat/up", SpaCommand::ThermostatUp),
        ("/api/thermostat/down", SpaCommand::ThermostatDown),
        ("/api/jet/toggle", SpaCommand::ToggleJet),
    ] {
        let commands = commands.clone();
        let snapshot = snapshot.clone();
        server.fn_handler(uri, Method::Post, move |req| {
            queue_command(req, &commands, &snapshot, command)
        })?;
    }

    server.fn_handler("/api/preferences", Method::Post, move |req| {
        let uri = req.uri().to_string();
        let Some(action) = query_param(&uri, "action") else {
            return write_error(req, 400, "Missing 'action' parameter");
        };
        let Some(command) = SpaCommand::from_name(&action) else {
            return write_error(req, 400, "Unknown action");
        };
        queue_command(req, &commands, &snapshot, command)
    })?;

    Ok(server)
}

fn current_snapshot(snapshot: &SharedSnapshot) -> Option<SpaSnapshot> {
    snapshot.lock().ok().and_then(|shared| shared.clone())
}

fn queue_command(
    req: HttpRequest<'_, '_>,
    commands: &SyncSender<SpaCommand>,
    snapshot: &SharedSnapshot,
    command: SpaCommand,
) -> anyhow::Result<()> {
    if let Err(err) = commands.try_send(command) {
        warn!("http command {} dropped: {err}", command.as_str());
        return write_error(req, 503, "Command queue is full");
    }

    match current_snapshot(snapshot) {
        Some(current) => write_json(req, 202, &current),
        None => write_json(req, 202, &serde_json::json!({})),
    }
}

fn write_json<T: Serialize>(
    req: HttpRequest<'_, '_>,
    status_code: u16,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(req: HttpRequest<'_, '_>, status_code: u16, message: &str) -> anyhow::Result<()> {
    write_json(req, status_code, &serde_json::json!({ "error": message }))
}

fn query_param(uri: &str, key: &str) -> Option<String> {
    let query = uri.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        (name == key).then(|| value.replace('+', " "))
    })
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
