use serde::Serialize;

use crate::config::TimerKind;

pub const POWER_CHANNELS: usize = 3;

/// Edge-triggered status changes produced by the core. Diagnostics travel on
/// the same channel as normal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Motion(bool),
    Occupancy(bool),
    Light(bool),
    /// Light switched on; carries the running trigger count.
    Triggered(u32),
    OverrideActive,
    OverrideCleared,
    TimerAccepted { kind: TimerKind, seconds: u32 },
    CommandRejected { topic: String, reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PowerReading {
    pub bus_voltage: f32,
    pub shunt_voltage: f32,
    pub current: f32,
    pub power: f32,
}

impl PowerReading {
    pub fn from_measurements(bus_voltage: f32, shunt_voltage: f32, current: f32) -> Self {
        Self {
            bus_voltage,
            shunt_voltage,
            current,
            power: bus_voltage * current,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PowerTelemetryPayload {
    pub voltage: f32,
    pub current: f32,
    pub power: f32,
}

impl From<&PowerReading> for PowerTelemetryPayload {
    fn from(reading: &PowerReading) -> Self {
        Self {
            voltage: reading.bus_voltage,
            current: reading.current,
            power: reading.power,
        }
    }
}

/// An outbound message for the network collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: &'static str,
    pub payload: String,
    pub retain: bool,
}

impl Publication {
    pub fn new(topic: &'static str, payload: impl Into<String>, retain: bool) -> Self {
        Self {
            topic,
            payload: payload.into(),
            retain,
        }
    }
}

/// An inbound message handed over by the network collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}
