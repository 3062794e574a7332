use std::{
    f32::consts::TAU,
    io::ErrorKind,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::{debug, info, warn};

use shed_monitor_common::{
    commands::MAX_PAYLOAD_BYTES, screen_lines, Board, ControllerConfig, Display, DisplayError,
    DisplaySnapshot,
    InboundMessage, MainLoop, Millis, PowerMonitor, PowerReading, Publication, RuntimeConfig,
    SensorError, TimerConfig, Transport, TransportError, PAYLOAD_OFFLINE, SUBSCRIBED_TOPICS,
    TOPIC_AVAILABILITY,
};

const LOOP_PERIOD_MS: u64 = 10;
const INBOX_CAPACITY: usize = 32;
const SIM_CLICK_HOLD_MS: u64 = 120;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new(runtime.network.client_id.clone(), mqtt_host, mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_last_will(LastWill::new(
        TOPIC_AVAILABILITY,
        PAYLOAD_OFFLINE.as_bytes().to_vec(),
        QoS::AtLeastOnce,
        true,
    ));
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    let link_up = Arc::new(AtomicBool::new(false));
    let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
    spawn_mqtt_loop(
        mqtt.clone(),
        eventloop,
        link_up.clone(),
        inbox_tx,
        reconnect_delay(&runtime.controller),
    );

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    spawn_console_reader(input_tx);

    let mut main_loop = MainLoop::new(
        &runtime,
        SimBoard::new(input_rx),
        SimPowerMonitor::default(),
        LogDisplay::default(),
        MqttLink {
            client: mqtt,
            link_up,
            inbox: inbox_rx,
        },
        monotonic_ms(),
    );
    main_loop.start().context("hardware bring-up failed")?;
    info!("shed monitor running; type `help` for simulated inputs");

    let mut interval = tokio::time::interval(Duration::from_millis(LOOP_PERIOD_MS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut ctrl_c => {
                info!("shutting down");
                main_loop.announce_offline();
                if let Some(timers) = main_loop.flush_pending_save() {
                    persist_timers(&store, timers).await;
                }
                break;
            }
        }

        let now = monotonic_ms();
        main_loop.tick(now);

        if let Some(timers) = main_loop.take_pending_save(now) {
            persist_timers(&store, timers).await;
        }
    }

    Ok(())
}

fn spawn_mqtt_loop(
    mqtt: AsyncClient,
    mut eventloop: rumqttc::EventLoop,
    link_up: Arc<AtomicBool>,
    inbox: mpsc::Sender<InboundMessage>,
    retry_after: Duration,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if message.payload.len() > MAX_PAYLOAD_BYTES {
                        warn!(
                            "dropping oversized MQTT payload on topic {} ({} bytes)",
                            message.topic,
                            message.payload.len()
                        );
                        continue;
                    }
                    let inbound = InboundMessage::new(message.topic, message.payload.to_vec());
                    if let Err(err) = inbox.try_send(inbound) {
                        warn!("mqtt inbox full, dropping message: {err}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    subscribe_topics(&mqtt);
                    link_up.store(true, Ordering::Relaxed);
                }
                Ok(_) => {}
                Err(err) => {
                    if link_up.swap(false, Ordering::Relaxed) {
                        warn!("mqtt link dropped: {err}");
                    } else {
                        debug!("mqtt poll error: {err}");
                    }
                    tokio::time::sleep(retry_after).await;
                }
            }
        }
    });
}

/// Pause between broker connection attempts.
fn reconnect_delay(controller: &ControllerConfig) -> Duration {
    Duration::from_millis(u64::from(controller.reconnect_backoff_ms))
}

// Sessions are not persistent, so every ConnAck needs fresh subscriptions.
fn subscribe_topics(mqtt: &AsyncClient) {
    for topic in SUBSCRIBED_TOPICS {
        if let Err(err) = mqtt.try_subscribe(topic, QoS::AtLeastOnce) {
            warn!("subscribe to {topic} failed: {err}");
        }
    }
}

/// Broker session as seen by the main loop. The rumqttc event loop task owns
/// the socket and its reconnects; this side only reads the link flag, drains
/// the inbox and queues publishes.
struct MqttLink {
    client: AsyncClient,
    link_up: Arc<AtomicBool>,
    inbox: mpsc::Receiver<InboundMessage>,
}

impl Transport for MqttLink {
    fn is_connected(&self) -> bool {
        self.link_up.load(Ordering::Relaxed)
    }

    fn try_connect(&mut self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::LinkDown)
        }
    }

    fn poll_incoming(&mut self) -> Option<InboundMessage> {
        self.inbox.try_recv().ok()
    }

    fn publish(&mut self, publication: &Publication) -> Result<(), TransportError> {
        self.client
            .try_publish(
                publication.topic,
                QoS::AtLeastOnce,
                publication.retain,
                publication.payload.clone().into_bytes(),
            )
            .map_err(|err| TransportError::Rejected(err.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimInput {
    ToggleMotion,
    Rotate(i32),
    Click,
}

fn parse_sim_input(line: &str) -> Option<SimInput> {
    match line.trim() {
        "m" | "motion" => Some(SimInput::ToggleMotion),
        "+" | "r" | "right" => Some(SimInput::Rotate(1)),
        "-" | "l" | "left" => Some(SimInput::Rotate(-1)),
        "c" | "click" => Some(SimInput::Click),
        _ => None,
    }
}

fn spawn_console_reader(tx: mpsc::UnboundedSender<SimInput>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_sim_input(&line) {
                    Some(input) => {
                        if tx.send(input).is_err() {
                            break;
                        }
                    }
                    None => info!("inputs: m (toggle PIR), + / - (rotate), c (click)"),
                },
                Ok(None) => break,
                Err(err) => {
                    warn!("console read failed: {err}");
                    break;
                }
            }
        }
    });
}

/// Console-driven stand-in for the PIR, relay and encoder pins.
struct SimBoard {
    inputs: mpsc::UnboundedReceiver<SimInput>,
    motion: bool,
    relay: bool,
    led: bool,
    encoder: i32,
    pressed_at: Option<Instant>,
}

impl SimBoard {
    fn new(inputs: mpsc::UnboundedReceiver<SimInput>) -> Self {
        Self {
            inputs,
            motion: false,
            relay: false,
            led: false,
            encoder: 0,
            pressed_at: None,
        }
    }

    fn drain_inputs(&mut self) {
        while let Ok(input) = self.inputs.try_recv() {
            match input {
                SimInput::ToggleMotion => {
                    self.motion = !self.motion;
                    info!("pir {}", if self.motion { "high" } else { "low" });
                }
                SimInput::Rotate(detents) => self.encoder = self.encoder.wrapping_add(detents),
                SimInput::Click => self.pressed_at = Some(Instant::now()),
            }
        }
    }
}

impl Board for SimBoard {
    fn motion_detected(&mut self) -> bool {
        self.motion
    }

    fn set_relay(&mut self, on: bool) {
        if self.relay != on {
            info!("relay {}", if on { "ON" } else { "OFF" });
        }
        self.relay = on;
    }

    fn set_motion_led(&mut self, on: bool) {
        if self.led != on {
            debug!("motion led {}", if on { "on" } else { "off" });
        }
        self.led = on;
    }

    fn encoder_position(&mut self) -> i32 {
        self.drain_inputs();
        self.encoder
    }

    // A console click holds the button long enough to pass the debounce.
    fn button_pressed(&mut self) -> bool {
        match self.pressed_at {
            Some(at) if at.elapsed() < Duration::from_millis(SIM_CLICK_HOLD_MS) => true,
            Some(_) => {
                self.pressed_at = None;
                false
            }
            None => false,
        }
    }
}

/// Slow synthetic waveforms: a solar panel following a daylight curve, a
/// battery and a steady load.
#[derive(Default)]
struct SimPowerMonitor {
    started: Option<Instant>,
}

impl PowerMonitor for SimPowerMonitor {
    fn init(&mut self) -> Result<(), SensorError> {
        self.started = Some(Instant::now());
        Ok(())
    }

    fn read_channel(&mut self, channel: usize) -> Result<PowerReading, SensorError> {
        let elapsed = self
            .started
            .map(|at| at.elapsed().as_secs_f32())
            .unwrap_or_default();
        let phase = (elapsed / 600.0 * TAU).sin().max(0.0);

        let (bus_voltage, current) = match channel {
            0 => (12.0 + 8.0 * phase, 1.5 * phase),
            1 => (12.4 + 0.6 * phase, 1.2 * phase - 0.3),
            2 => (12.1, 0.3),
            _ => return Err(SensorError::InvalidChannel(channel)),
        };
        Ok(PowerReading::from_measurements(bus_voltage, current * 0.1, current))
    }
}

/// Writes the screen to the log whenever its text changes.
#[derive(Default)]
struct LogDisplay {
    last_frame: Vec<String>,
}

impl Display for LogDisplay {
    fn init(&mut self) -> Result<(), DisplayError> {
        Ok(())
    }

    fn render(&mut self, snapshot: &DisplaySnapshot) -> Result<(), DisplayError> {
        let frame = screen_lines(snapshot);
        if frame != self.last_frame {
            debug!("screen:\n{}", frame.join("\n"));
            self.last_frame = frame;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("SHED_MONITOR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.shed-monitor"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let path = self.runtime_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

async fn persist_timers(store: &AppStore, timers: TimerConfig) {
    let result = async {
        let mut runtime = store.load_runtime_config().await?;
        runtime.timers = timers;
        store.save_runtime_config(&runtime).await
    }
    .await;

    match result {
        Ok(()) => info!(
            "saved timers: motion {}s, manual {}s",
            timers.motion_duration_ms / 1_000,
            timers.manual_duration_ms / 1_000
        ),
        Err(err) => warn!("failed to persist timers: {err:#}"),
    }
}

/// Uptime in milliseconds, wrapping like the device counter.
fn monotonic_ms() -> Millis {
    static START: OnceLock<Instant> = OnceLock::new();
    let elapsed = START.get_or_init(Instant::now).elapsed().as_millis();
    (elapsed % (u128::from(u32::MAX) + 1)) as Millis
}
