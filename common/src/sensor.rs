use log::warn;

use crate::{
    hal::{Board, PowerMonitor, SensorError},
    scheduler::{IntervalGate, Millis},
    types::{PowerReading, POWER_CHANNELS},
};

/// Owns the power monitor and serves the latest readings. A failed channel
/// keeps its previous value.
#[derive(Debug)]
pub struct SensorReader<P> {
    monitor: P,
    gate: IntervalGate,
    readings: [PowerReading; POWER_CHANNELS],
    last_update_ms: Option<Millis>,
    failed_reads: u32,
}

impl<P: PowerMonitor> SensorReader<P> {
    pub fn new(monitor: P, poll_interval_ms: u32) -> Self {
        Self {
            monitor,
            gate: IntervalGate::new(poll_interval_ms),
            readings: [PowerReading::default(); POWER_CHANNELS],
            last_update_ms: None,
            failed_reads: 0,
        }
    }

    pub fn init(&mut self) -> Result<(), SensorError> {
        self.monitor.init()
    }

    /// Reads all channels if the poll interval elapsed. Returns true when a
    /// poll happened.
    pub fn poll(&mut self, now: Millis) -> bool {
        if !self.gate.poll(now) {
            return false;
        }

        for (channel, slot) in self.readings.iter_mut().enumerate() {
            match self.monitor.read_channel(channel) {
                Ok(reading) => *slot = reading,
                Err(err) => {
                    self.failed_reads = self.failed_reads.saturating_add(1);
                    warn!("power channel {} read failed: {err}", channel + 1);
                }
            }
        }
        self.last_update_ms = Some(now);
        true
    }

    /// Samples the motion input. Called once per tick so every consumer in
    /// that tick sees the same level.
    pub fn sample_motion<B: Board>(&mut self, board: &mut B) -> bool {
        board.motion_detected()
    }

    pub fn readings(&self) -> &[PowerReading; POWER_CHANNELS] {
        &self.readings
    }

    pub fn reading(&self, channel: usize) -> Option<&PowerReading> {
        self.readings.get(channel)
    }

    pub fn last_update_ms(&self) -> Option<Millis> {
        self.last_update_ms
    }

    pub fn failed_reads(&self) -> u32 {
        self.failed_reads
    }
}
