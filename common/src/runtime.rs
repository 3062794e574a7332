//! The cooperative main loop. One call to [`MainLoop::tick`] is one pass:
//! network, input, inactivity, UI, occupancy, sensors, display, in that
//! order. Nothing in a pass blocks; slow work is owned by the collaborators
//! and observed again on a later pass.

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    commands::{
        parse_command, power_publications, session_publications, status_publication, Command,
        CommandError,
    },
    config::{RuntimeConfig, TimerConfig},
    display::DisplaySnapshot,
    hal::{Board, Display, DisplayError, PowerMonitor, SensorError, Transport},
    input::{InputEvents, InputRouter},
    occupancy::OccupancyEngine,
    scheduler::{elapsed_ms, Millis, TaskScheduler},
    sensor::SensorReader,
    topics::{PAYLOAD_OFFLINE, TOPIC_AVAILABILITY},
    types::{InboundMessage, Publication, StatusEvent},
    ui::{UiCommand, UiNavigator},
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Display(#[from] DisplayError),
    #[error(transparent)]
    Sensor(#[from] SensorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    Reconnect,
    Telemetry,
    Render,
}

pub struct MainLoop<B, P, D, T> {
    board: B,
    sensors: SensorReader<P>,
    display: D,
    transport: T,

    engine: OccupancyEngine,
    ui: UiNavigator,
    input: InputRouter,
    tasks: TaskScheduler<Task>,

    session_up: bool,
    save_debounce_ms: u32,
    pending_save_since: Option<Millis>,
}

impl<B, P, D, T> MainLoop<B, P, D, T>
where
    B: Board,
    P: PowerMonitor,
    D: Display,
    T: Transport,
{
    pub fn new(config: &RuntimeConfig, board: B, monitor: P, display: D, transport: T, now: Millis) -> Self {
        let mut config = config.clone();
        config.sanitize();
        let ctl = &config.controller;

        Self {
            board,
            sensors: SensorReader::new(monitor, ctl.sensor_poll_interval_ms),
            display,
            transport,
            engine: OccupancyEngine::new(config.timers, ctl.override_motion_policy),
            ui: UiNavigator::new(ctl.inactivity_timeout_ms, ctl.edit_step_ms, now),
            input: InputRouter::new(ctl.encoder_counts_per_detent, ctl.button_debounce_ms),
            tasks: TaskScheduler::new()
                .with_task(Task::Reconnect, ctl.reconnect_backoff_ms)
                .with_task(Task::Telemetry, ctl.telemetry_interval_ms)
                .with_task(Task::Render, ctl.display_refresh_interval_ms),
            session_up: false,
            save_debounce_ms: ctl.settings_save_debounce_ms,
            pending_save_since: None,
        }
    }

    /// Boot-time bring-up of the display and the power monitor. Either
    /// failing is fatal; the caller should not start ticking.
    pub fn start(&mut self) -> Result<(), StartupError> {
        self.board.set_relay(false);
        self.display.init()?;
        self.sensors.init()?;
        info!("display and power monitor ready");
        Ok(())
    }

    pub fn tick(&mut self, now: Millis) -> Vec<StatusEvent> {
        let mut events = Vec::new();

        self.service_network(now, &mut events);

        let input = self.poll_input(now);

        if self.ui.expire_if_inactive(now) {
            info!("ui idle; back to the power overview");
        }

        self.apply_input(input, now, &mut events);

        let motion = self.sensors.sample_motion(&mut self.board);
        self.board.set_motion_led(motion);
        for event in self.engine.tick(now, motion) {
            if let StatusEvent::Light(on) = event {
                self.board.set_relay(on);
            }
            events.push(event);
        }

        self.sensors.poll(now);
        if self.transport.is_connected() && self.tasks.poll(Task::Telemetry, now) {
            for publication in power_publications(self.sensors.readings()) {
                self.publish(&publication);
            }
        }

        if self.tasks.poll(Task::Render, now) {
            let snapshot = self.snapshot(now);
            if let Err(err) = self.display.render(&snapshot) {
                warn!("display render failed: {err}");
            }
        }

        self.emit(&events);
        events
    }

    fn service_network(&mut self, now: Millis, events: &mut Vec<StatusEvent>) {
        if !self.transport.is_connected() {
            if self.session_up {
                warn!("broker link lost");
                self.session_up = false;
            }
            if !self.tasks.poll(Task::Reconnect, now) {
                return;
            }
            match self.transport.try_connect() {
                Ok(()) => info!("broker connection established"),
                Err(err) => {
                    warn!("broker connect failed: {err}; retrying later");
                    return;
                }
            }
        }

        if !self.transport.is_connected() {
            return;
        }
        if !self.session_up {
            self.session_up = true;
            let announce = session_publications(
                self.engine.timers(),
                self.engine.is_light_on(),
                self.engine.is_override_active(),
            );
            for publication in announce {
                self.publish(&publication);
            }
        }

        while let Some(message) = self.transport.poll_incoming() {
            self.dispatch(&message, now, events);
        }
    }

    fn dispatch(&mut self, message: &InboundMessage, now: Millis, events: &mut Vec<StatusEvent>) {
        let command = match parse_command(message) {
            Ok(command) => command,
            Err(CommandError::UnknownTopic) => {
                debug!("ignoring message on {}", message.topic);
                return;
            }
            Err(err) => {
                warn!("rejected command on {}: {err}", message.topic);
                events.push(StatusEvent::CommandRejected {
                    topic: message.topic.clone(),
                    reason: err.to_string(),
                });
                return;
            }
        };

        match command {
            Command::Light(true) => events.extend(self.engine.manual_on(now)),
            Command::Light(false) => events.extend(self.engine.manual_off(now)),
            Command::SetTimer { kind, seconds } => match self.engine.set_timer_seconds(kind, seconds) {
                Ok(changed) => {
                    info!("{kind} timer set to {seconds}s");
                    if changed {
                        self.queue_settings_save(now);
                    }
                    events.push(StatusEvent::TimerAccepted { kind, seconds });
                }
                Err(err) => {
                    warn!("rejected command on {}: {err}", message.topic);
                    events.push(StatusEvent::CommandRejected {
                        topic: message.topic.clone(),
                        reason: err.to_string(),
                    });
                }
            },
        }
    }

    fn poll_input(&mut self, now: Millis) -> InputEvents {
        let position = self.board.encoder_position();
        let pressed = self.board.button_pressed();
        self.input.poll(now, position, pressed)
    }

    fn apply_input(&mut self, input: InputEvents, now: Millis, events: &mut Vec<StatusEvent>) {
        if input.rotation != 0 {
            self.ui.on_rotate(input.rotation, now);
        }
        if !input.clicked {
            return;
        }

        match self.ui.on_click(now, self.engine.timers()) {
            Some(UiCommand::ToggleLight) => events.extend(self.engine.toggle(now)),
            Some(UiCommand::CommitTimer { kind, duration_ms }) => {
                if self.engine.commit_timer(kind, duration_ms) {
                    self.queue_settings_save(now);
                }
                let seconds = self.engine.timers().get(kind) / 1_000;
                info!("{kind} timer set to {seconds}s from the panel");
                events.push(StatusEvent::TimerAccepted { kind, seconds });
            }
            None => {}
        }
    }

    fn emit(&mut self, events: &[StatusEvent]) {
        if events.is_empty() {
            return;
        }
        if !self.transport.is_connected() {
            debug!("offline; dropping {} status updates", events.len());
            return;
        }
        for event in events {
            self.publish(&status_publication(event));
        }
    }

    fn publish(&mut self, publication: &Publication) {
        if let Err(err) = self.transport.publish(publication) {
            warn!("publish to {} failed: {err}", publication.topic);
        }
    }

    /// Best-effort availability update before a clean shutdown.
    pub fn announce_offline(&mut self) {
        if self.transport.is_connected() {
            self.publish(&Publication::new(TOPIC_AVAILABILITY, PAYLOAD_OFFLINE, true));
        }
    }

    fn queue_settings_save(&mut self, now: Millis) {
        self.pending_save_since = Some(now);
    }

    /// The timer config to persist, once it has been stable for the save
    /// debounce.
    pub fn take_pending_save(&mut self, now: Millis) -> Option<TimerConfig> {
        let since = self.pending_save_since?;
        if elapsed_ms(now, since) < self.save_debounce_ms {
            return None;
        }
        self.pending_save_since = None;
        Some(*self.engine.timers())
    }

    /// Any unsaved timer config, regardless of the debounce.
    pub fn flush_pending_save(&mut self) -> Option<TimerConfig> {
        self.pending_save_since.take()?;
        Some(*self.engine.timers())
    }

    pub fn snapshot(&self, now: Millis) -> DisplaySnapshot {
        DisplaySnapshot {
            ui: *self.ui.state(),
            light_on: self.engine.is_light_on(),
            override_active: self.engine.is_override_active(),
            motion: self.engine.motion_detected(),
            connected: self.transport.is_connected(),
            remaining_ms: self.engine.remaining_ms(now),
            current_on_ms: self.engine.current_on_ms(now),
            previous_on_ms: self.engine.previous_on_ms(),
            total_on_ms: self.engine.total_on_ms(),
            trigger_count: self.engine.trigger_count(),
            timers: *self.engine.timers(),
            readings: *self.sensors.readings(),
        }
    }

    pub fn engine(&self) -> &OccupancyEngine {
        &self.engine
    }

    pub fn ui(&self) -> &UiNavigator {
        &self.ui
    }

    pub fn sensors(&self) -> &SensorReader<P> {
        &self.sensors
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
