//! Rotary encoder and push-button conditioning.

use crate::scheduler::{elapsed_ms, Millis};

/// Discrete UI input gathered during one loop pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputEvents {
    /// Whole detents turned since the previous poll, signed by direction.
    pub rotation: i32,
    /// A debounced press edge.
    pub clicked: bool,
}

impl InputEvents {
    pub fn is_empty(&self) -> bool {
        self.rotation == 0 && !self.clicked
    }
}

#[derive(Debug, Clone)]
pub struct InputRouter {
    counts_per_detent: i32,
    last_position: Option<i32>,
    pending_counts: i32,

    debounce_ms: u32,
    raw_pressed: bool,
    raw_changed_ms: Millis,
    stable_pressed: bool,
}

impl InputRouter {
    pub fn new(counts_per_detent: u8, debounce_ms: u32) -> Self {
        Self {
            counts_per_detent: i32::from(counts_per_detent.max(1)),
            last_position: None,
            pending_counts: 0,
            debounce_ms,
            raw_pressed: false,
            raw_changed_ms: 0,
            stable_pressed: false,
        }
    }

    /// Feeds the current encoder count and raw button level. The first call
    /// only records the encoder baseline.
    pub fn poll(&mut self, now: Millis, encoder_position: i32, button_pressed: bool) -> InputEvents {
        InputEvents {
            rotation: self.update_encoder(encoder_position),
            clicked: self.update_button(now, button_pressed),
        }
    }

    fn update_encoder(&mut self, position: i32) -> i32 {
        let Some(last) = self.last_position.replace(position) else {
            return 0;
        };

        self.pending_counts = self
            .pending_counts
            .saturating_add(position.wrapping_sub(last));
        let detents = self.pending_counts / self.counts_per_detent;
        self.pending_counts -= detents * self.counts_per_detent;
        detents
    }

    fn update_button(&mut self, now: Millis, pressed: bool) -> bool {
        if pressed != self.raw_pressed {
            self.raw_pressed = pressed;
            self.raw_changed_ms = now;
            return false;
        }

        if pressed == self.stable_pressed
            || elapsed_ms(now, self.raw_changed_ms) < self.debounce_ms
        {
            return false;
        }

        self.stable_pressed = pressed;
        pressed
    }
}

/// Software decoder for a two-phase (CLK/DT) encoder sampled by polling.
#[derive(Debug, Clone, Default)]
pub struct QuadratureDecoder {
    state: u8,
    position: i32,
}

impl QuadratureDecoder {
    // Indexed by (previous AB << 2) | current AB; invalid double steps count 0.
    const TRANSITIONS: [i8; 16] = [0, -1, 1, 0, 1, 0, 0, -1, -1, 0, 0, 1, 0, 1, -1, 0];

    pub fn new(clk: bool, dt: bool) -> Self {
        Self {
            state: Self::encode(clk, dt),
            position: 0,
        }
    }

    pub fn update(&mut self, clk: bool, dt: bool) -> i32 {
        let next = Self::encode(clk, dt);
        let index = usize::from((self.state << 2) | next);
        self.position = self
            .position
            .wrapping_add(i32::from(Self::TRANSITIONS[index]));
        self.state = next;
        self.position
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    fn encode(clk: bool, dt: bool) -> u8 {
        (u8::from(clk) << 1) | u8::from(dt)
    }
}
