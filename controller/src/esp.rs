use core::convert::TryInto;
use std::{
    cell::RefCell,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        mpsc, Arc, Mutex, MutexGuard, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_hal::i2c::{ErrorType, Operation};
use embedded_svc::{
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    gpio::{AnyIOPin, AnyOutputPin, IOPin, Input, Output, OutputPin, PinDriver, Pull},
    i2c::{I2cConfig, I2cDriver, I2C0},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::*},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, LwtConfiguration, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::{BlockingWifi, EspWifi},
};
use log::{error, info, warn};

use shed_monitor_common::{
    commands::MAX_PAYLOAD_BYTES, ina3221::Ina3221, input::QuadratureDecoder, sh1107::Sh1107,
    Board, InboundMessage, MainLoop, Millis, NetworkConfig, Publication, RuntimeConfig,
    TimerConfig, Transport, TransportError, PAYLOAD_OFFLINE, SUBSCRIBED_TOPICS,
    TOPIC_AVAILABILITY,
};

const NVS_NAMESPACE: &str = "shed_monitor";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const LOOP_PERIOD_MS: u64 = 10;
const ENCODER_SAMPLE_MS: u64 = 1;
const INBOX_CAPACITY: usize = 32;
const I2C_BAUDRATE_KHZ: u32 = 400;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    info!(
        "NVS config loaded: ssid=`{}`, mqtt=`{}:{}`, timers {}s/{}s",
        runtime.network.wifi_ssid,
        runtime.network.mqtt_host,
        runtime.network.mqtt_port,
        runtime.timers.motion_duration_ms / 1_000,
        runtime.timers.manual_duration_ms / 1_000,
    );

    let Peripherals {
        modem, pins, i2c0, ..
    } = Peripherals::take()?;

    // The light keeps working on motion and the panel without a network, so
    // a failed join only costs the broker link.
    let wifi = match connect_wifi(modem, sys_loop, nvs_partition, &runtime.network) {
        Ok(wifi) => Some(wifi),
        Err(err) => {
            warn!("wifi unavailable, running offline: {err:#}");
            None
        }
    };

    let retry_after = Duration::from_millis(u64::from(runtime.controller.reconnect_backoff_ms));
    let (mqtt_client, mqtt_conn) = create_mqtt_client(&runtime.network, retry_after)?;
    let mqtt_client = Arc::new(Mutex::new(mqtt_client));
    let link_up = Arc::new(AtomicBool::new(false));
    let (inbox_tx, inbox_rx) = mpsc::sync_channel(INBOX_CAPACITY);
    spawn_mqtt_receiver(
        mqtt_conn,
        mqtt_client.clone(),
        link_up.clone(),
        inbox_tx,
        retry_after,
    );

    let encoder = Arc::new(AtomicI32::new(0));
    spawn_encoder_sampler(
        PinDriver::input(pins.gpio1.downgrade())?,
        PinDriver::input(pins.gpio2.downgrade())?,
        encoder.clone(),
    )?;

    let mut pir = PinDriver::input(pins.gpio16.downgrade())?;
    pir.set_pull(Pull::Down)?;
    let mut relay = PinDriver::output(pins.gpio17.downgrade_output())?;
    relay.set_low()?;
    let mut led = PinDriver::output(pins.gpio15.downgrade_output())?;
    led.set_high()?;
    let mut button = PinDriver::input(pins.gpio21.downgrade())?;
    button.set_pull(Pull::Up)?;

    let hardware = Hardware {
        i2c: i2c0,
        sda: pins.gpio22.downgrade(),
        scl: pins.gpio23.downgrade(),
        board: ShedBoard {
            pir,
            relay,
            led,
            button,
            encoder,
        },
        link: EspMqttLink {
            client: mqtt_client,
            link_up,
            inbox: inbox_rx,
        },
    };

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;

    let control = thread::Builder::new()
        .name("control-loop".into())
        .stack_size(16 * 1024)
        .spawn(move || run_control_loop(runtime, hardware, nvs_store))
        .context("failed to spawn control loop thread")?;

    // Keep the station alive for the program lifetime.
    let _wifi = wifi;
    match control.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("control loop panicked")),
    }
}

struct Hardware {
    i2c: I2C0,
    sda: AnyIOPin,
    scl: AnyIOPin,
    board: ShedBoard,
    link: EspMqttLink,
}

fn run_control_loop(
    runtime: RuntimeConfig,
    hardware: Hardware,
    nvs_store: NvsStore,
) -> anyhow::Result<()> {
    let config = I2cConfig::new().baudrate(I2C_BAUDRATE_KHZ.kHz().into());
    let driver = I2cDriver::new(hardware.i2c, hardware.sda, hardware.scl, &config)?;
    let bus = SharedI2c(Rc::new(RefCell::new(driver)));

    let mut main_loop = MainLoop::new(
        &runtime,
        hardware.board,
        Ina3221::new(bus.clone()),
        Sh1107::new(bus),
        hardware.link,
        monotonic_ms(),
    );
    if let Err(err) = main_loop.start() {
        error!("hardware bring-up failed: {err}");
        return Err(err.into());
    }
    info!("shed monitor running");

    if let Err(err) = add_current_task_to_watchdog() {
        warn!("failed to register control loop with watchdog: {err:#}");
    }

    loop {
        feed_watchdog();
        let now = monotonic_ms();
        main_loop.tick(now);

        if let Some(timers) = main_loop.take_pending_save(now) {
            persist_timers(&nvs_store, timers);
        }

        thread::sleep(Duration::from_millis(LOOP_PERIOD_MS));
    }
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    if network.wifi_ssid.trim().is_empty() {
        return Err(anyhow!("no wifi credentials configured"));
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

    if let Some(err) = last_err {
        let _ = wifi.stop();
        return Err(err.into());
    }

    drop(wifi);
    Ok(esp_wifi)
}

fn create_mqtt_client(
    network: &NetworkConfig,
    retry_after: Duration,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port);

    let conf = MqttClientConfiguration {
        client_id: Some(network.client_id.as_str()),
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
        keep_alive_interval: Some(Duration::from_secs(30)),
        reconnect_timeout: Some(retry_after),
        lwt: Some(LwtConfiguration {
            topic: TOPIC_AVAILABILITY,
            payload: PAYLOAD_OFFLINE.as_bytes(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }),
        ..Default::default()
    };

    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

fn lock_client(
    mqtt: &Mutex<EspMqttClient<'static>>,
) -> anyhow::Result<MutexGuard<'_, EspMqttClient<'static>>> {
    mqtt.lock().map_err(|_| anyhow!("mqtt client lock poisoned"))
}

fn subscribe_topics(mqtt: &Mutex<EspMqttClient<'static>>) -> anyhow::Result<()> {
    let mut mqtt = lock_client(mqtt)?;
    for topic in SUBSCRIBED_TOPICS {
        mqtt.subscribe(topic, QoS::AtLeastOnce)?;
    }
    Ok(())
}

enum LinkEvent {
    Up,
    Down,
    Message(InboundMessage),
    Other,
}

fn spawn_mqtt_receiver(
    mut conn: EspMqttConnection,
    mqtt: Arc<Mutex<EspMqttClient<'static>>>,
    link_up: Arc<AtomicBool>,
    inbox: mpsc::SyncSender<InboundMessage>,
    retry_after: Duration,
) {
    let spawned = thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(12 * 1024)
        .spawn(move || loop {
            // The event borrows the client's callback slot; release it
            // before issuing subscriptions.
            let link_event = match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => LinkEvent::Up,
                    EventPayload::Disconnected => LinkEvent::Down,
                    EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details: Details::Complete,
                        ..
                    } => {
                        if data.len() > MAX_PAYLOAD_BYTES {
                            warn!(
                                "dropping oversized MQTT payload on topic {} ({} bytes)",
                                topic,
                                data.len()
                            );
                            LinkEvent::Other
                        } else {
                            LinkEvent::Message(InboundMessage::new(topic, data.to_vec()))
                        }
                    }
                    _ => LinkEvent::Other,
                },
                Err(err) => {
                    warn!("mqtt receive loop error: {err:?}");
                    thread::sleep(retry_after);
                    LinkEvent::Down
                }
            };

            match link_event {
                LinkEvent::Up => {
                    info!("mqtt connected");
                    match subscribe_topics(&mqtt) {
                        Ok(()) => link_up.store(true, Ordering::Relaxed),
                        Err(err) => warn!("mqtt subscribe failed: {err:#}"),
                    }
                }
                LinkEvent::Down => {
                    if link_up.swap(false, Ordering::Relaxed) {
                        warn!("mqtt link dropped");
                    }
                }
                LinkEvent::Message(message) => {
                    if let Err(err) = inbox.try_send(message) {
                        warn!("mqtt inbox full, dropping message: {err}");
                    }
                }
                LinkEvent::Other => {}
            }
        });

    if let Err(err) = spawned {
        error!("failed to spawn mqtt receiver thread: {err}");
    }
}

/// Broker session for the loop. esp-mqtt owns the socket and reconnects on
/// its own; the receiver thread mirrors the session state into `link_up`.
struct EspMqttLink {
    client: Arc<Mutex<EspMqttClient<'static>>>,
    link_up: Arc<AtomicBool>,
    inbox: mpsc::Receiver<InboundMessage>,
}

impl Transport for EspMqttLink {
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
        let mut client = lock_client(&self.client)
            .map_err(|err| TransportError::Rejected(err.to_string()))?;
        client
            .enqueue(
                publication.topic,
                QoS::AtLeastOnce,
                publication.retain,
                publication.payload.as_bytes(),
            )
            .map(|_| ())
            .map_err(|err| TransportError::Rejected(err.to_string()))
    }
}

/// PIR on GPIO16, relay on GPIO17, encoder button on GPIO21 (active low),
/// user LED on GPIO15 (active low). The encoder phases are decoded on their
/// own thread.
struct ShedBoard {
    pir: PinDriver<'static, AnyIOPin, Input>,
    relay: PinDriver<'static, AnyOutputPin, Output>,
    led: PinDriver<'static, AnyOutputPin, Output>,
    button: PinDriver<'static, AnyIOPin, Input>,
    encoder: Arc<AtomicI32>,
}

impl Board for ShedBoard {
    fn motion_detected(&mut self) -> bool {
        self.pir.is_high()
    }

    fn set_relay(&mut self, on: bool) {
        let result = if on {
            self.relay.set_high()
        } else {
            self.relay.set_low()
        };
        if let Err(err) = result {
            warn!("relay write failed: {err}");
        }
    }

    fn set_motion_led(&mut self, on: bool) {
        let result = if on {
            self.led.set_low()
        } else {
            self.led.set_high()
        };
        if let Err(err) = result {
            warn!("motion led write failed: {err}");
        }
    }

    fn encoder_position(&mut self) -> i32 {
        self.encoder.load(Ordering::Relaxed)
    }

    fn button_pressed(&mut self) -> bool {
        self.button.is_low()
    }
}

fn spawn_encoder_sampler(
    mut clk: PinDriver<'static, AnyIOPin, Input>,
    mut dt: PinDriver<'static, AnyIOPin, Input>,
    position: Arc<AtomicI32>,
) -> anyhow::Result<()> {
    clk.set_pull(Pull::Up)?;
    dt.set_pull(Pull::Up)?;

    thread::Builder::new()
        .name("encoder".into())
        .stack_size(4 * 1024)
        .spawn(move || {
            let mut decoder = QuadratureDecoder::new(clk.is_high(), dt.is_high());
            loop {
                let now = decoder.update(clk.is_high(), dt.is_high());
                position.store(now, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(ENCODER_SAMPLE_MS));
            }
        })
        .context("failed to spawn encoder thread")?;
    Ok(())
}

/// Lets the power monitor and the display share the one I2C controller. Both
/// live on the control loop thread.
#[derive(Clone)]
struct SharedI2c(Rc<RefCell<I2cDriver<'static>>>);

impl ErrorType for SharedI2c {
    type Error = <I2cDriver<'static> as ErrorType>::Error;
}

impl embedded_hal::i2c::I2c for SharedI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        embedded_hal::i2c::I2c::transaction(&mut *self.0.borrow_mut(), address, operations)
    }
}

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 2048];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }

    fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let payload = serde_json::to_string(runtime)?;
        nvs.set_str(NVS_RUNTIME_KEY, &payload)?;
        Ok(())
    }
}

fn persist_timers(nvs_store: &NvsStore, timers: TimerConfig) {
    let result = nvs_store.load_runtime_config().and_then(|mut runtime| {
        runtime.timers = timers;
        nvs_store.save_runtime_config(&runtime)
    });

    match result {
        Ok(()) => info!(
            "saved timers: motion {}s, manual {}s",
            timers.motion_duration_ms / 1_000,
            timers.manual_duration_ms / 1_000
        ),
        Err(err) => warn!("failed to persist timers to NVS: {err:#}"),
    }
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

/// Milliseconds since boot, wrapping at `u32::MAX`.
fn monotonic_ms() -> Millis {
    static START: OnceLock<Instant> = OnceLock::new();
    let elapsed = START.get_or_init(Instant::now).elapsed().as_millis();
    (elapsed % (u128::from(u32::MAX) + 1)) as Millis
}
