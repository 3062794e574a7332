use std::collections::VecDeque;

use pretty_assertions::assert_eq;
use shed_monitor_common::{
    ui::{LightsView, MenuItem},
    Board, ControlMode, Display, DisplayError, DisplayMode, DisplaySnapshot, InboundMessage,
    MainLoop, OverrideMotionPolicy, PowerMonitor, PowerReading, Publication, RuntimeConfig,
    SensorError, StartupError, StatusEvent, TimerKind, Transport, TransportError,
    TOPIC_AVAILABILITY, TOPIC_DIAGNOSTIC, TOPIC_LIGHT_COMMAND, TOPIC_LIGHT_OVERRIDE_STATE,
    TOPIC_LIGHT_STATE, TOPIC_MANUAL_TIMER_SET, TOPIC_MANUAL_TIMER_STATE, TOPIC_MOTION_TIMER_SET,
    TOPIC_OCCUPANCY_STATE, TOPIC_POWER_CH1, TOPIC_TRIGGER_COUNT,
};

#[derive(Default)]
struct FakeBoard {
    motion: bool,
    relay: bool,
    led: bool,
    encoder: i32,
    button: bool,
}

impl Board for FakeBoard {
    fn motion_detected(&mut self) -> bool {
        self.motion
    }

    fn set_relay(&mut self, on: bool) {
        self.relay = on;
    }

    fn set_motion_led(&mut self, on: bool) {
        self.led = on;
    }

    fn encoder_position(&mut self) -> i32 {
        self.encoder
    }

    fn button_pressed(&mut self) -> bool {
        self.button
    }
}

struct FakeMonitor {
    reading: PowerReading,
}

impl PowerMonitor for FakeMonitor {
    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn read_channel(&mut self, channel: usize) -> Result<PowerReading, SensorError> {
        if channel < 3 {
            Ok(self.reading)
        } else {
            Err(SensorError::InvalidChannel(channel))
        }
    }
}

#[derive(Default)]
struct FakeDisplay {
    fail_init: bool,
    frames: Vec<DisplaySnapshot>,
}

impl Display for FakeDisplay {
    fn init(&mut self) -> Result<(), DisplayError> {
        if self.fail_init {
            Err(DisplayError::Init("no ack at 0x3c".to_string()))
        } else {
            Ok(())
        }
    }

    fn render(&mut self, snapshot: &DisplaySnapshot) -> Result<(), DisplayError> {
        self.frames.push(snapshot.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakeTransport {
    connected: bool,
    broker_up: bool,
    connect_attempts: Vec<u32>,
    clock: u32,
    inbox: VecDeque<InboundMessage>,
    sent: Vec<Publication>,
}

impl FakeTransport {
    fn sent_to(&self, topic: &str) -> Vec<&str> {
        self.sent
            .iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.payload.as_str())
            .collect()
    }
}

impl Transport for FakeTransport {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn try_connect(&mut self) -> Result<(), TransportError> {
        self.connect_attempts.push(self.clock);
        if self.broker_up {
            self.connected = true;
            Ok(())
        } else {
            Err(TransportError::LinkDown)
        }
    }

    fn poll_incoming(&mut self) -> Option<InboundMessage> {
        self.inbox.pop_front()
    }

    fn publish(&mut self, publication: &Publication) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::LinkDown);
        }
        self.sent.push(publication.clone());
        Ok(())
    }
}

type Rig = MainLoop<FakeBoard, FakeMonitor, FakeDisplay, FakeTransport>;

fn config(motion_ms: u32, manual_ms: u32) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.timers.motion_duration_ms = motion_ms;
    config.timers.manual_duration_ms = manual_ms;
    config
}

fn rig_with(config: &RuntimeConfig, connected: bool) -> Rig {
    let mut rig = MainLoop::new(
        config,
        FakeBoard::default(),
        FakeMonitor {
            reading: PowerReading::from_measurements(12.6, 0.02, 0.2),
        },
        FakeDisplay::default(),
        FakeTransport {
            connected,
            broker_up: connected,
            ..FakeTransport::default()
        },
        0,
    );
    rig.start().unwrap();
    rig
}

fn rig(motion_ms: u32, manual_ms: u32) -> Rig {
    rig_with(&config(motion_ms, manual_ms), true)
}

fn tick(rig: &mut Rig, now: u32) -> Vec<StatusEvent> {
    rig.transport_mut().clock = now;
    rig.tick(now)
}

fn send(rig: &mut Rig, topic: &str, payload: &str) {
    rig.transport_mut()
        .inbox
        .push_back(InboundMessage::new(topic, payload.as_bytes()));
}

fn light_events(events: &[StatusEvent]) -> Vec<&StatusEvent> {
    events
        .iter()
        .filter(|e| {
            matches!(
                e,
                StatusEvent::Occupancy(_) | StatusEvent::Light(_) | StatusEvent::OverrideCleared
            )
        })
        .collect()
}

#[test]
fn motion_pulse_lights_for_exactly_the_motion_duration() {
    let mut rig = rig(10_000, 300_000);

    rig.board_mut().motion = true;
    let events = tick(&mut rig, 0);
    assert!(rig.board().relay);
    assert_eq!(rig.engine().light_on_ms(), Some(0));
    assert_eq!(
        light_events(&events),
        vec![&StatusEvent::Occupancy(true), &StatusEvent::Light(true)]
    );

    rig.board_mut().motion = false;
    tick(&mut rig, 1);
    tick(&mut rig, 9_999);
    assert!(rig.board().relay);

    let events = tick(&mut rig, 10_001);
    assert!(!rig.board().relay);
    assert_eq!(
        events,
        vec![StatusEvent::Occupancy(false), StatusEvent::Light(false)]
    );

    let transport = rig.transport();
    assert_eq!(transport.sent_to(TOPIC_OCCUPANCY_STATE), vec!["on", "off"]);
    assert_eq!(transport.sent_to(TOPIC_LIGHT_STATE), vec!["OFF", "ON", "OFF"]);
}

#[test]
fn trigger_count_is_published_after_each_light_on() {
    let mut rig = rig(10_000, 300_000);

    for (at, level) in [(0, true), (100, false), (10_200, false), (20_000, true)] {
        rig.board_mut().motion = level;
        tick(&mut rig, at);
    }

    let transport = rig.transport();
    assert_eq!(transport.sent_to(TOPIC_TRIGGER_COUNT), vec!["1", "2"]);
    let order: Vec<(&str, &str)> = transport
        .sent
        .iter()
        .filter(|p| p.topic == TOPIC_LIGHT_STATE || p.topic == TOPIC_TRIGGER_COUNT)
        .map(|p| (p.topic, p.payload.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![
            (TOPIC_LIGHT_STATE, "OFF"),
            (TOPIC_LIGHT_STATE, "ON"),
            (TOPIC_TRIGGER_COUNT, "1"),
            (TOPIC_LIGHT_STATE, "OFF"),
            (TOPIC_LIGHT_STATE, "ON"),
            (TOPIC_TRIGGER_COUNT, "2"),
        ]
    );
    assert!(transport
        .sent
        .iter()
        .filter(|p| p.topic == TOPIC_TRIGGER_COUNT)
        .all(|p| p.retain));
}

#[test]
fn motion_led_follows_the_pir_level() {
    let mut rig = rig(10_000, 300_000);

    rig.board_mut().motion = true;
    tick(&mut rig, 0);
    assert!(rig.board().led);

    rig.board_mut().motion = false;
    tick(&mut rig, 100);
    assert!(!rig.board().led);
    // The relay stays on for the window; the LED does not.
    assert!(rig.board().relay);

    send(&mut rig, TOPIC_LIGHT_COMMAND, "ON");
    tick(&mut rig, 200);
    assert!(!rig.board().led);
}

#[test]
fn repeated_motion_edges_extend_the_window_from_the_last_edge() {
    let mut rig = rig(10_000, 300_000);

    for (at, level) in [(0, true), (100, false), (6_000, true), (6_100, false)] {
        rig.board_mut().motion = level;
        tick(&mut rig, at);
    }

    tick(&mut rig, 15_999);
    assert!(rig.board().relay);
    tick(&mut rig, 16_000);
    assert!(!rig.board().relay);
    assert_eq!(rig.engine().trigger_count(), 1);
}

#[test]
fn off_command_ends_override_within_one_tick() {
    let mut rig = rig(10_000, 300_000);

    send(&mut rig, TOPIC_LIGHT_COMMAND, "ON");
    tick(&mut rig, 0);
    assert!(rig.board().relay);
    assert_eq!(rig.engine().mode(), ControlMode::ManualOverride);

    send(&mut rig, TOPIC_LIGHT_COMMAND, "off");
    let events = tick(&mut rig, 2_000);
    assert!(!rig.board().relay);
    assert_eq!(rig.engine().mode(), ControlMode::Auto);
    assert_eq!(
        light_events(&events),
        vec![
            &StatusEvent::OverrideCleared,
            &StatusEvent::Occupancy(false),
            &StatusEvent::Light(false),
        ]
    );
    assert_eq!(
        rig.transport().sent_to(TOPIC_LIGHT_OVERRIDE_STATE),
        vec!["OFF", "ON", "OFF"]
    );
}

#[test]
fn motion_during_override_leaves_the_window_alone() {
    let mut rig = rig(10_000, 300_000);

    send(&mut rig, TOPIC_LIGHT_COMMAND, "ON");
    tick(&mut rig, 0);

    rig.board_mut().motion = true;
    let events = tick(&mut rig, 1_000);
    assert_eq!(events, vec![StatusEvent::Motion(true)]);
    rig.board_mut().motion = false;
    tick(&mut rig, 1_500);

    tick(&mut rig, 299_999);
    assert!(rig.board().relay);

    let events = tick(&mut rig, 300_000);
    assert!(!rig.board().relay);
    assert!(events.contains(&StatusEvent::OverrideCleared));
    assert_eq!(rig.engine().mode(), ControlMode::Auto);
}

#[test]
fn refresh_policy_restarts_override_on_motion() {
    let mut config = config(10_000, 300_000);
    config.controller.override_motion_policy = OverrideMotionPolicy::Refresh;
    let mut rig = rig_with(&config, true);

    send(&mut rig, TOPIC_LIGHT_COMMAND, "ON");
    tick(&mut rig, 0);
    rig.board_mut().motion = true;
    tick(&mut rig, 1_000);

    tick(&mut rig, 300_500);
    assert!(rig.board().relay);
    tick(&mut rig, 301_000);
    assert!(!rig.board().relay);
}

#[test]
fn timer_commands_validate_bounds_and_echo() {
    let mut rig = rig(60_000, 300_000);

    send(&mut rig, TOPIC_MOTION_TIMER_SET, "9");
    send(&mut rig, TOPIC_MANUAL_TIMER_SET, "3601");
    let events = tick(&mut rig, 0);
    assert_eq!(rig.engine().timers().motion_duration_ms, 60_000);
    assert_eq!(rig.engine().timers().manual_duration_ms, 300_000);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, StatusEvent::CommandRejected { .. }))
            .count(),
        2
    );
    assert_eq!(rig.transport().sent_to(TOPIC_DIAGNOSTIC).len(), 2);

    send(&mut rig, TOPIC_MOTION_TIMER_SET, "10");
    send(&mut rig, TOPIC_MANUAL_TIMER_SET, "3600");
    tick(&mut rig, 10);
    assert_eq!(rig.engine().timers().motion_duration_ms, 10_000);
    assert_eq!(rig.engine().timers().manual_duration_ms, 3_600_000);
    assert_eq!(
        rig.transport().sent_to(TOPIC_MANUAL_TIMER_STATE),
        vec!["300", "3600"]
    );
}

#[test]
fn garbage_payload_changes_nothing() {
    let mut rig = rig(10_000, 300_000);

    send(&mut rig, TOPIC_LIGHT_COMMAND, "maybe");
    let events = tick(&mut rig, 0);

    assert!(!rig.board().relay);
    assert_eq!(rig.engine().mode(), ControlMode::Auto);
    assert!(matches!(
        events.as_slice(),
        [StatusEvent::CommandRejected { topic, .. }] if topic == TOPIC_LIGHT_COMMAND
    ));
}

#[test]
fn same_instant_ticks_are_idempotent() {
    let mut rig = rig(10_000, 300_000);
    rig.board_mut().motion = true;

    assert!(!tick(&mut rig, 500).is_empty());
    let sent = rig.transport().sent.len();
    assert!(tick(&mut rig, 500).is_empty());
    assert!(tick(&mut rig, 500).is_empty());
    assert_eq!(rig.transport().sent.len(), sent);
}

#[test]
fn runs_locally_while_offline_and_reconnects_on_backoff() {
    let mut rig = rig_with(&config(10_000, 300_000), false);

    rig.board_mut().motion = true;
    tick(&mut rig, 0);
    assert!(rig.board().relay);

    tick(&mut rig, 4_999);
    tick(&mut rig, 5_000);
    assert_eq!(rig.transport().connect_attempts, vec![0, 5_000]);

    rig.transport_mut().broker_up = true;
    tick(&mut rig, 9_000);
    assert_eq!(rig.transport().connect_attempts.len(), 2);
    tick(&mut rig, 10_000);

    let transport = rig.transport();
    assert!(transport.connected);
    assert_eq!(transport.sent_to(TOPIC_AVAILABILITY), vec!["online"]);
    // The session announcement carries the live relay state; the motion
    // window closes later in the same pass.
    assert_eq!(transport.sent_to(TOPIC_LIGHT_STATE), vec!["ON", "OFF"]);
}

#[test]
fn session_is_announced_again_after_link_loss() {
    let mut rig = rig(10_000, 300_000);
    tick(&mut rig, 0);

    rig.transport_mut().connected = false;
    tick(&mut rig, 100);
    tick(&mut rig, 5_100);

    assert_eq!(rig.transport().sent_to(TOPIC_AVAILABILITY), vec!["online", "online"]);
}

#[test]
fn reconnect_announcement_restates_an_active_override() {
    let mut rig = rig(10_000, 300_000);
    send(&mut rig, TOPIC_LIGHT_COMMAND, "ON");
    tick(&mut rig, 0);
    assert_eq!(rig.transport().sent_to(TOPIC_LIGHT_OVERRIDE_STATE), vec!["OFF", "ON"]);

    rig.transport_mut().connected = false;
    tick(&mut rig, 100);
    tick(&mut rig, 5_100);

    let transport = rig.transport();
    assert!(transport.connected);
    assert_eq!(
        transport.sent_to(TOPIC_LIGHT_OVERRIDE_STATE),
        vec!["OFF", "ON", "ON"]
    );
    assert_eq!(transport.sent_to(TOPIC_LIGHT_STATE).last(), Some(&"ON"));
}

#[test]
fn power_telemetry_follows_its_own_cadence() {
    let mut rig = rig(10_000, 300_000);

    for now in (0..=20_000).step_by(100) {
        tick(&mut rig, now);
    }

    let ch1 = rig.transport().sent_to(TOPIC_POWER_CH1);
    assert_eq!(ch1.len(), 3);
    assert!(ch1[0].contains("\"voltage\":12.6"));
    assert_eq!(rig.sensors().readings()[2].current, 0.2);
}

#[test]
fn display_gets_snapshots_at_its_refresh_rate() {
    let mut rig = rig(10_000, 300_000);

    for now in (0..1_000).step_by(10) {
        tick(&mut rig, now);
    }

    assert_eq!(rig.display().frames.len(), 10);
}

#[test]
fn display_failure_at_boot_is_fatal() {
    let mut rig = MainLoop::new(
        &RuntimeConfig::default(),
        FakeBoard::default(),
        FakeMonitor {
            reading: PowerReading::default(),
        },
        FakeDisplay {
            fail_init: true,
            ..FakeDisplay::default()
        },
        FakeTransport::default(),
        0,
    );

    assert!(matches!(rig.start(), Err(StartupError::Display(_))));
}

fn turn(rig: &mut Rig, now: u32, detents: i32) {
    rig.board_mut().encoder += detents;
    tick(rig, now);
}

fn click(rig: &mut Rig, now: u32) {
    rig.board_mut().button = true;
    tick(rig, now);
    tick(rig, now + 60);
    rig.board_mut().button = false;
    tick(rig, now + 120);
    tick(rig, now + 180);
}

#[test]
fn full_encoder_revolution_returns_to_power_overview() {
    let mut rig = rig(10_000, 300_000);
    tick(&mut rig, 0);

    for step in 1..=5 {
        turn(&mut rig, step * 10, 1);
    }

    assert_eq!(rig.ui().state().mode, DisplayMode::PowerAll);
}

#[test]
fn panel_edit_commits_staged_timer_and_echoes_it() {
    let mut rig = rig(60_000, 300_000);
    tick(&mut rig, 0);

    turn(&mut rig, 10, -1);
    assert_eq!(rig.ui().state().mode, DisplayMode::Lights);
    click(&mut rig, 100);
    turn(&mut rig, 400, 1);
    assert_eq!(
        rig.ui().state().lights,
        LightsView::Menu(MenuItem::MotionTimer)
    );
    click(&mut rig, 500);
    // One step per pass, whatever the detent count.
    turn(&mut rig, 800, 2);
    turn(&mut rig, 810, 1);
    assert_eq!(
        rig.ui().state().staged_edit(),
        Some((TimerKind::Motion, 120_000))
    );
    assert_eq!(rig.engine().timers().motion_duration_ms, 60_000);

    click(&mut rig, 900);
    assert_eq!(rig.engine().timers().motion_duration_ms, 120_000);
    assert!(rig
        .transport()
        .sent
        .contains(&Publication::new(
            shed_monitor_common::TOPIC_MOTION_TIMER_STATE,
            "120",
            true
        )));
    assert_eq!(
        rig.take_pending_save(5_960).map(|t| t.motion_duration_ms),
        Some(120_000)
    );
}

#[test]
fn inactivity_discards_a_staged_edit() {
    let mut rig = rig(60_000, 300_000);
    tick(&mut rig, 0);

    turn(&mut rig, 10, -1);
    click(&mut rig, 100);
    turn(&mut rig, 400, 1);
    turn(&mut rig, 410, 1);
    click(&mut rig, 500);
    turn(&mut rig, 800, 1);
    assert_eq!(
        rig.ui().state().staged_edit(),
        Some((TimerKind::Manual, 330_000))
    );

    tick(&mut rig, 800 + 30_000);
    assert_eq!(rig.ui().state().mode, DisplayMode::PowerAll);
    assert_eq!(rig.ui().state().staged_edit(), None);
    assert_eq!(rig.engine().timers().manual_duration_ms, 300_000);
    assert_eq!(rig.take_pending_save(60_000), None);
}

#[test]
fn panel_toggle_drives_the_relay_through_the_override() {
    let mut rig = rig(10_000, 300_000);
    tick(&mut rig, 0);

    turn(&mut rig, 10, -1);
    click(&mut rig, 100);
    click(&mut rig, 400);
    assert!(rig.board().relay);
    assert_eq!(rig.engine().mode(), ControlMode::ManualOverride);
    assert_eq!(rig.ui().state().lights, LightsView::LiveStatus);

    click(&mut rig, 700);
    click(&mut rig, 1_000);
    assert!(!rig.board().relay);
    assert_eq!(rig.engine().mode(), ControlMode::Auto);
}
