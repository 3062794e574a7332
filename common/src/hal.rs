//! Collaborator seams. The core calls these and never blocks on them: every
//! method must return promptly, with I/O that takes longer driven elsewhere
//! and checked again on a later tick.

use thiserror::Error;

use crate::{
    display::DisplaySnapshot,
    types::{InboundMessage, PowerReading, Publication},
};

/// Digital I/O owned by the loop: the PIR input, the relay output and the
/// encoder.
pub trait Board {
    fn motion_detected(&mut self) -> bool;

    fn set_relay(&mut self, on: bool);

    /// Status LED that mirrors the PIR level.
    fn set_motion_led(&mut self, on: bool);

    /// Monotonic encoder count; wraps like an `i32` counter.
    fn encoder_position(&mut self) -> i32;

    /// Raw (undebounced) button level, true while held.
    fn button_pressed(&mut self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("power monitor not found: {0}")]
    NotFound(String),
    #[error("power monitor bus error: {0}")]
    Bus(String),
    #[error("power channel {0} does not exist")]
    InvalidChannel(usize),
}

pub trait PowerMonitor {
    /// Boot-time probe; a failure here is fatal to startup.
    fn init(&mut self) -> Result<(), SensorError>;

    /// Reads one zero-based channel.
    fn read_channel(&mut self, channel: usize) -> Result<PowerReading, SensorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisplayError {
    #[error("display not responding: {0}")]
    Init(String),
    #[error("display write failed: {0}")]
    Write(String),
}

pub trait Display {
    fn init(&mut self) -> Result<(), DisplayError>;

    fn render(&mut self, snapshot: &DisplaySnapshot) -> Result<(), DisplayError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("broker link is down")]
    LinkDown,
    #[error("transport rejected request: {0}")]
    Rejected(String),
}

/// The MQTT session as seen from the loop.
pub trait Transport {
    fn is_connected(&self) -> bool;

    /// One non-blocking (re)connect attempt. On success the session is
    /// subscribed to the command topics and ready to publish.
    fn try_connect(&mut self) -> Result<(), TransportError>;

    /// Next queued inbound message, if any.
    fn poll_incoming(&mut self) -> Option<InboundMessage>;

    fn publish(&mut self, publication: &Publication) -> Result<(), TransportError>;
}
