//! Inbound command parsing and outbound status mapping for the broker link.

use log::warn;
use thiserror::Error;

use crate::{
    config::{ConfigError, TimerConfig, TimerKind, MAX_TIMER_SECS, MIN_TIMER_SECS},
    topics::*,
    types::{InboundMessage, PowerReading, PowerTelemetryPayload, Publication, StatusEvent},
};

pub const MAX_PAYLOAD_BYTES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Light(bool),
    SetTimer { kind: TimerKind, seconds: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("not a command topic")]
    UnknownTopic,
    #[error("payload of {0} bytes exceeds {max} bytes", max = MAX_PAYLOAD_BYTES)]
    PayloadTooLarge(usize),
    #[error("payload is not utf-8")]
    InvalidUtf8,
    #[error("unrecognised payload {0:?}")]
    InvalidPayload(String),
    #[error(transparent)]
    OutOfRange(#[from] ConfigError),
}

pub fn parse_command(message: &InboundMessage) -> Result<Command, CommandError> {
    if message.payload.len() > MAX_PAYLOAD_BYTES {
        return Err(CommandError::PayloadTooLarge(message.payload.len()));
    }
    let text = core::str::from_utf8(&message.payload)
        .map_err(|_| CommandError::InvalidUtf8)?
        .trim();

    match message.topic.as_str() {
        TOPIC_LIGHT_COMMAND => {
            if text.eq_ignore_ascii_case("on") {
                Ok(Command::Light(true))
            } else if text.eq_ignore_ascii_case("off") {
                Ok(Command::Light(false))
            } else {
                Err(CommandError::InvalidPayload(text.to_string()))
            }
        }
        TOPIC_MOTION_TIMER_SET => parse_timer(TimerKind::Motion, text),
        TOPIC_MANUAL_TIMER_SET => parse_timer(TimerKind::Manual, text),
        _ => Err(CommandError::UnknownTopic),
    }
}

fn parse_timer(kind: TimerKind, text: &str) -> Result<Command, CommandError> {
    let seconds = parse_seconds(text).ok_or_else(|| CommandError::InvalidPayload(text.to_string()))?;
    if !(MIN_TIMER_SECS..=MAX_TIMER_SECS).contains(&seconds) {
        return Err(ConfigError::OutOfRange { kind, seconds }.into());
    }
    Ok(Command::SetTimer { kind, seconds })
}

/// Whole seconds as `"30"` or `"30.0"`. Negative or fractional values fail.
fn parse_seconds(text: &str) -> Option<u32> {
    if let Ok(seconds) = text.parse::<u32>() {
        return Some(seconds);
    }
    let value = text.parse::<f64>().ok()?;
    if !value.is_finite() || value.fract() != 0.0 || value < 0.0 || value > f64::from(u32::MAX) {
        return None;
    }
    Some(value as u32)
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

fn on_off_upper(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// Outbound messages for one status edge.
pub fn status_publication(event: &StatusEvent) -> Publication {
    match event {
        StatusEvent::Motion(on) => Publication::new(TOPIC_MOTION_STATE, on_off(*on), false),
        StatusEvent::Occupancy(on) => Publication::new(TOPIC_OCCUPANCY_STATE, on_off(*on), false),
        StatusEvent::Light(on) => Publication::new(TOPIC_LIGHT_STATE, on_off_upper(*on), true),
        StatusEvent::Triggered(count) => {
            Publication::new(TOPIC_TRIGGER_COUNT, count.to_string(), true)
        }
        StatusEvent::OverrideActive => override_publication(true),
        StatusEvent::OverrideCleared => override_publication(false),
        StatusEvent::TimerAccepted { kind, seconds } => {
            Publication::new(timer_state_topic(*kind), seconds.to_string(), true)
        }
        StatusEvent::CommandRejected { topic, reason } => Publication::new(
            TOPIC_DIAGNOSTIC,
            format!("rejected {topic}: {reason}"),
            false,
        ),
    }
}

fn override_publication(active: bool) -> Publication {
    Publication::new(TOPIC_LIGHT_OVERRIDE_STATE, on_off_upper(active), false)
}

/// Published on every (re)connect.
pub fn session_publications(
    timers: &TimerConfig,
    light_on: bool,
    override_active: bool,
) -> Vec<Publication> {
    let mut out = vec![
        Publication::new(TOPIC_AVAILABILITY, PAYLOAD_ONLINE, true),
        Publication::new(TOPIC_LIGHT_STATE, on_off_upper(light_on), true),
        override_publication(override_active),
    ];
    for kind in [TimerKind::Motion, TimerKind::Manual] {
        out.push(Publication::new(
            timer_state_topic(kind),
            (timers.get(kind) / 1_000).to_string(),
            true,
        ));
    }
    out
}

pub fn power_publications(readings: &[PowerReading]) -> Vec<Publication> {
    POWER_TOPICS
        .iter()
        .zip(readings)
        .filter_map(|(topic, reading)| {
            match serde_json::to_string(&PowerTelemetryPayload::from(reading)) {
                Ok(json) => Some(Publication::new(*topic, json, false)),
                Err(err) => {
                    warn!("power telemetry encode failed for {topic}: {err}");
                    None
                }
            }
        })
        .collect()
}
