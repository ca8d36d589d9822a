use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Timelike, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use spa_common::{
    storage::{self, ResetOutcome, STORE_CAPACITY},
    ActuatorError, ActuatorSink, ByteStore, ClockError, ClockReading, ClockSource, MemoryStore,
    RuntimeConfig, SensorError, SensorId, SpaCommand, SpaController, SpaSnapshot, StorageError,
    TemperatureReader, TickReport, TOPIC_CMD_JET, TOPIC_CMD_THERMOSTAT, TOPIC_CONTROLLER_STATE,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 64;
const COMMAND_QUEUE_DEPTH: usize = 16;

#[derive(Clone)]
struct AppState {
    commands: mpsc::Sender<SpaCommand>,
    snapshot: watch::Receiver<Option<SpaSnapshot>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("SPA_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.spa"));

    let mut runtime = load_runtime_config(&data_dir.join("runtime.json"))
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load runtime config: {err:#}");
            RuntimeConfig::default()
        });
    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime.sanitize();

    let mut clock = ZonedClock::new(&runtime.timezone);
    let mut store = open_store(&data_dir.join("eeprom.bin"));

    reset_buckets_if_requested(&mut store, &mut clock, env_flag("SPA_RESET_BUCKETS"))?;

    let (controller, boot) = SpaController::load(runtime.controller.clone(), store);
    if let Some(version) = boot.migrated_from {
        info!(from = version, "persistent layout migrated");
    }
    if let Some(err) = boot.storage_error {
        warn!("persistent state unreadable, running on defaults: {err}");
    }
    info!(
        thermostat_f = controller.state().thermostat().degrees_f(),
        day = controller.state().telemetry().current_day(),
        "controller state restored"
    );

    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (snapshot_tx, snapshot_rx) = watch::channel(None);

    let mqtt_options = build_mqtt_options(&runtime);
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    subscribe_topics(&mqtt).await?;

    let heater_on = Arc::new(AtomicBool::new(false));
    let sensors = SimulatedSensors::new(heater_on.clone(), clock.tz);
    let sink = LoggingSink::new(heater_on);

    spawn_control_loop(
        controller,
        ControlIo {
            sensors,
            clock,
            sink,
        },
        command_rx,
        snapshot_tx,
    );
    spawn_mqtt_loop(command_tx.clone(), eventloop);
    spawn_state_publish_loop(
        mqtt,
        snapshot_rx.clone(),
        runtime.controller.state_publish_interval_ms,
    );

    let app_state = AppState {
        commands: command_tx,
        snapshot: snapshot_rx,
    };
    let app = Router::new()
        .route("/api/state", get(handle_get_state))
        .route("/api/thermostat/up", post(handle_thermostat_up))
        .route("/api/thermostat/down", post(handle_thermostat_down))
        .route("/api/jet/toggle", post(handle_jet_toggle))
        .route("/api/preferences", post(handle_preferences))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.network.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("spa controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn load_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid runtime config at {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, lookup: impl Fn(&str) -> Option<String>) {
    let network = &mut runtime.network;
    if let Some(host) = lookup("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        network.mqtt_port = port;
    }
    if let Some(user) = lookup("MQTT_USER") {
        network.mqtt_user = user;
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        network.mqtt_pass = pass;
    }
    if let Some(port) = lookup("SPA_HTTP_PORT").and_then(|value| value.parse::<u16>().ok()) {
        network.http_port = port;
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn reset_buckets_if_requested<S: ByteStore, C: ClockSource>(
    store: &mut S,
    clock: &mut C,
    requested: bool,
) -> anyhow::Result<ResetOutcome> {
    let day = clock.now().map(ClockReading::day).unwrap_or(0);
    let outcome = storage::apply_reset_request(store, requested, day)
        .context("failed to reset daily buckets")?;
    match outcome {
        ResetOutcome::Reset => warn!(day, "daily buckets reset"),
        ResetOutcome::AlreadyApplied => {
            warn!("bucket reset already applied, unset SPA_RESET_BUCKETS to re-arm it")
        }
        ResetOutcome::NotRequested => {}
    }
    Ok(outcome)
}

fn build_mqtt_options(runtime: &RuntimeConfig) -> MqttOptions {
    let network = &runtime.network;
    let mut options = MqttOptions::new(
        "spa-controller-rust",
        network.mqtt_host.clone(),
        network.mqtt_port,
    );
    options.set_keep_alive(Duration::from_secs(30));
    if !network.mqtt_user.is_empty() {
        options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
    }
    options
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    for topic in [TOPIC_CMD_THERMOSTAT, TOPIC_CMD_JET] {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

struct ControlIo {
    sensors: SimulatedSensors,
    clock: ZonedClock,
    sink: LoggingSink,
}

fn spawn_control_loop(
    mut controller: SpaController<HostStore>,
    mut io: ControlIo,
    mut commands: mpsc::Receiver<SpaCommand>,
    snapshot_tx: watch::Sender<Option<SpaSnapshot>>,
) {
    let tick_interval = Duration::from_millis(controller.config().tick_interval_ms);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buckets_readable = true;

        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();

            // Store writes are blocking single-byte file updates.
            let current = tokio::task::block_in_place(|| {
                let report = controller.tick(&mut io.sensors, &mut io.clock, &mut io.sink, now_ms);
                log_tick_report(&report);

                if let Ok(command) = commands.try_recv() {
                    match controller.apply_command(command) {
                        Ok(()) => info!(command = command.as_str(), "command applied"),
                        Err(err) => warn!(
                            command = command.as_str(),
                            "command applied but not persisted: {err}"
                        ),
                    }
                }

                controller.snapshot()
            });

            let readable = current.heater_minutes.is_some();
            if readable != buckets_readable {
                buckets_readable = readable;
                if readable {
                    info!("telemetry buckets readable again");
                } else {
                    warn!("telemetry buckets unreadable, reporting without them");
                }
            }
            snapshot_tx.send_replace(Some(current));
        }
    });
}

fn log_tick_report(report: &TickReport) {
    for err in &report.sensor_errors {
        warn!("sensor: {err}");
    }
    if report.policy_skipped {
        warn!("no usable temperature reading, heater held off");
    }
    if let Some(err) = &report.clock_error {
        debug!("clock: {err}");
    }
    for err in &report.actuator_errors {
        warn!("actuator: {err}");
    }
    if let Some(flush) = &report.flush {
        if let Some(day) = flush.rolled_over_to {
            info!(day, "telemetry rolled over to new day");
        }
        for err in &flush.errors {
            warn!("telemetry write lost: {err}");
        }
        debug!(
            heat_index_units = flush.heat_index_units,
            solar_pump_units = flush.solar_pump_units,
            "minute flushed"
        );
    }
}

fn spawn_mqtt_loop(commands: mpsc::Sender<SpaCommand>, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    handle_mqtt_message(&commands, &message.topic, &message.payload);
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn handle_mqtt_message(commands: &mpsc::Sender<SpaCommand>, topic: &str, payload: &[u8]) {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return;
    }
    let Ok(message) = std::str::from_utf8(payload) else {
        warn!("dropping non utf8 MQTT payload on topic {topic}");
        return;
    };

    match spa_common::topics::command_for(topic, message) {
        Some(command) => {
            if let Err(err) = commands.try_send(command) {
                warn!("mqtt command {} dropped: {err}", command.as_str());
            }
        }
        None => debug!("ignoring MQTT message on {topic}: {message:?}"),
    }
}

fn spawn_state_publish_loop(
    mqtt: AsyncClient,
    snapshot: watch::Receiver<Option<SpaSnapshot>>,
    interval_ms: u64,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;

            let payload = match snapshot.borrow().as_ref() {
                Some(current) => serde_json::to_vec(current),
                None => continue,
            };

            match payload {
                Ok(body) => {
                    if let Err(err) = mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }
        }
    });
}

async fn handle_get_state(State(state): State<AppState>) -> impl IntoResponse {
    match state.snapshot.borrow().clone() {
        Some(snapshot) => Json(snapshot).into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "Controller is starting"),
    }
}

async fn handle_thermostat_up(State(state): State<AppState>) -> impl IntoResponse {
    queue_command(&state, SpaCommand::ThermostatUp)
}

async fn handle_thermostat_down(State(state): State<AppState>) -> impl IntoResponse {
    queue_command(&state, SpaCommand::ThermostatDown)
}

async fn handle_jet_toggle(State(state): State<AppState>) -> impl IntoResponse {
    queue_command(&state, SpaCommand::ToggleJet)
}

/// Form-style command endpoint: `?action=thermostatUp|thermostatDown|toggleJet`.
async fn handle_preferences(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(action) = params.get("action") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'action' parameter");
    };
    let Some(command) = SpaCommand::from_name(action) else {
        return error_response(StatusCode::BAD_REQUEST, "Unknown action");
    };
    queue_command(&state, command)
}

/// The command lands on a later tick, so the reply carries the snapshot as of
/// the last completed tick.
fn queue_command(state: &AppState, command: SpaCommand) -> axum::response::Response {
    if let Err(err) = state.commands.try_send(command) {
        warn!("http command {} dropped: {err}", command.as_str());
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Command queue is full");
    }

    match state.snapshot.borrow().clone() {
        Some(snapshot) => (StatusCode::ACCEPTED, Json(snapshot)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// File image of the byte store. Reads come from the cached image; each write
/// goes to disk and is synced before returning.
struct FileStore {
    file: File,
    image: Vec<u8>,
}

impl FileStore {
    fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut image = Vec::with_capacity(STORE_CAPACITY);
        file.read_to_end(&mut image)?;
        if image.len() < STORE_CAPACITY {
            // Missing cells read back as erased.
            let existing = image.len();
            image.resize(STORE_CAPACITY, 0xFF);
            file.seek(SeekFrom::Start(existing as u64))?;
            file.write_all(&image[existing..])?;
            file.sync_all()?;
        }
        image.truncate(STORE_CAPACITY);

        Ok(Self { file, image })
    }

    fn write_through(&mut self, offset: usize, value: u8) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(&[value])?;
        self.file.sync_data()
    }
}

impl ByteStore for FileStore {
    fn capacity(&self) -> usize {
        self.image.len()
    }

    fn read_byte(&mut self, offset: usize) -> Result<u8, StorageError> {
        self.image
            .get(offset)
            .copied()
            .ok_or(StorageError::OutOfBounds(offset))
    }

    fn write_byte(&mut self, offset: usize, value: u8) -> Result<(), StorageError> {
        if offset >= self.image.len() {
            return Err(StorageError::OutOfBounds(offset));
        }
        self.write_through(offset, value)
            .map_err(|err| StorageError::Write {
                offset,
                reason: err.to_string(),
            })?;
        self.image[offset] = value;
        Ok(())
    }
}

enum HostStore {
    File(FileStore),
    Memory(MemoryStore),
}

fn open_store(path: &Path) -> HostStore {
    match FileStore::open(path) {
        Ok(store) => {
            info!("persistent store at {}", path.display());
            HostStore::File(store)
        }
        Err(err) => {
            warn!(
                "failed to open persistent store at {}, telemetry will not survive restart: {err}",
                path.display()
            );
            HostStore::Memory(MemoryStore::erased())
        }
    }
}

impl ByteStore for HostStore {
    fn capacity(&self) -> usize {
        match self {
            Self::File(store) => store.capacity(),
            Self::Memory(store) => store.capacity(),
        }
    }

    fn read_byte(&mut self, offset: usize) -> Result<u8, StorageError> {
        match self {
            Self::File(store) => store.read_byte(offset),
            Self::Memory(store) => store.read_byte(offset),
        }
    }

    fn write_byte(&mut self, offset: usize, value: u8) -> Result<(), StorageError> {
        match self {
            Self::File(store) => store.write_byte(offset, value),
            Self::Memory(store) => store.write_byte(offset, value),
        }
    }
}

/// Desktop stand-in for the two I2C sensors. The solar collector follows the
/// sun over the local day; the spa warms while the heater runs and otherwise
/// cools toward ambient.
struct SimulatedSensors {
    heater_on: Arc<AtomicBool>,
    tz: Tz,
    spa_f: f32,
}

impl SimulatedSensors {
    const AMBIENT_F: f32 = 68.0;
    const HEAT_RATE_F: f32 = 0.05;
    const COOL_RATE: f32 = 0.0005;

    fn new(heater_on: Arc<AtomicBool>, tz: Tz) -> Self {
        Self {
            heater_on,
            tz,
            spa_f: 95.0,
        }
    }

    fn hour_of_day<T: Timelike>(now: &T) -> f32 {
        now.hour() as f32 + now.minute() as f32 / 60.0
    }

    fn solar_heater_f(hour_of_day: f32) -> f32 {
        let sun = ((hour_of_day - 6.0) / 12.0 * std::f32::consts::PI).sin().max(0.0);
        Self::AMBIENT_F + 110.0 * sun
    }

    fn step_spa(&mut self) -> f32 {
        if self.heater_on.load(Ordering::Relaxed) {
            self.spa_f += Self::HEAT_RATE_F;
        } else {
            self.spa_f -= (self.spa_f - Self::AMBIENT_F) * Self::COOL_RATE;
        }
        self.spa_f
    }
}

impl TemperatureReader for SimulatedSensors {
    fn read_fahrenheit(&mut self, sensor: SensorId) -> Result<f32, SensorError> {
        match sensor {
            SensorId::SolarHeater => {
                let local = Utc::now().with_timezone(&self.tz);
                Ok(Self::solar_heater_f(Self::hour_of_day(&local)))
            }
            SensorId::Spa => Ok(self.step_spa()),
        }
    }
}

struct ZonedClock {
    tz: Tz,
}

impl ZonedClock {
    fn new(timezone: &str) -> Self {
        let tz = timezone.parse::<Tz>().unwrap_or_else(|_| {
            warn!("unknown timezone {timezone:?}, using UTC");
            Tz::UTC
        });
        Self { tz }
    }
}

impl ClockSource for ZonedClock {
    fn now(&mut self) -> Result<ClockReading, ClockError> {
        ClockReading::from_datetime(&Utc::now().with_timezone(&self.tz))
    }
}

/// Logs output transitions in place of relay drivers.
struct LoggingSink {
    heater_on: Arc<AtomicBool>,
    last: HashMap<&'static str, bool>,
}

impl LoggingSink {
    fn new(heater_on: Arc<AtomicBool>) -> Self {
        Self {
            heater_on,
            last: HashMap::new(),
        }
    }

    fn drive(&mut self, output: &'static str, on: bool) -> Result<(), ActuatorError> {
        if self.last.insert(output, on) != Some(on) {
            info!(output, on, "output changed");
        }
        Ok(())
    }
}

impl ActuatorSink for LoggingSink {
    fn set_heater(&mut self, on: bool) -> Result<(), ActuatorError> {
        self.heater_on.store(on, Ordering::Relaxed);
        self.drive("heater", on)
    }

    fn set_circulation(&mut self, on: bool) -> Result<(), ActuatorError> {
        self.drive("circulation", on)
    }

    fn set_solar_pump(&mut self, on: bool) -> Result<(), ActuatorError> {
        self.drive("solar pump", on)
    }

    fn set_jet(&mut self, on: bool) -> Result<(), ActuatorError> {
        self.drive("jet", on)
    }
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
