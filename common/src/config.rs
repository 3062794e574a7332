use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_TIMER_MS: u32 = 10_000;
pub const MAX_TIMER_MS: u32 = 3_600_000;
pub const MIN_TIMER_SECS: u32 = MIN_TIMER_MS / 1_000;
pub const MAX_TIMER_SECS: u32 = MAX_TIMER_MS / 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error(
        "{kind} timer value {seconds}s outside {min}..={max}s",
        min = MIN_TIMER_SECS,
        max = MAX_TIMER_SECS
    )]
    OutOfRange { kind: TimerKind, seconds: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerKind {
    Motion,
    Manual,
}

impl TimerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Motion => "motion",
            Self::Manual => "manual",
        }
    }
}

impl core::fmt::Display for TimerKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two light-timer durations. Values are kept inside
/// `MIN_TIMER_MS..=MAX_TIMER_MS` by every setter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    pub motion_duration_ms: u32,
    pub manual_duration_ms: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            motion_duration_ms: 60_000,
            manual_duration_ms: 300_000,
        }
    }
}

impl TimerConfig {
    pub fn get(&self, kind: TimerKind) -> u32 {
        match kind {
            TimerKind::Motion => self.motion_duration_ms,
            TimerKind::Manual => self.manual_duration_ms,
        }
    }

    /// Writes a clamped duration. Returns true when the stored value changed.
    pub fn set(&mut self, kind: TimerKind, duration_ms: u32) -> bool {
        let clamped = clamp_timer_ms(duration_ms);
        let slot = match kind {
            TimerKind::Motion => &mut self.motion_duration_ms,
            TimerKind::Manual => &mut self.manual_duration_ms,
        };
        if *slot != clamped {
            *slot = clamped;
            true
        } else {
            false
        }
    }

    /// Validated write used by external commands: out-of-range values are
    /// rejected and the previous value is retained.
    pub fn set_from_seconds(&mut self, kind: TimerKind, seconds: u32) -> Result<bool, ConfigError> {
        if !(MIN_TIMER_SECS..=MAX_TIMER_SECS).contains(&seconds) {
            return Err(ConfigError::OutOfRange { kind, seconds });
        }
        Ok(self.set(kind, seconds * 1_000))
    }

    pub fn sanitize(&mut self) {
        self.motion_duration_ms = clamp_timer_ms(self.motion_duration_ms);
        self.manual_duration_ms = clamp_timer_ms(self.manual_duration_ms);
    }
}

pub fn clamp_timer_ms(duration_ms: u32) -> u32 {
    duration_ms.clamp(MIN_TIMER_MS, MAX_TIMER_MS)
}

/// Whether a motion edge during a manual override restarts the override window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideMotionPolicy {
    #[default]
    Ignore,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub reconnect_backoff_ms: u32,
    pub sensor_poll_interval_ms: u32,
    pub display_refresh_interval_ms: u32,
    pub telemetry_interval_ms: u32,
    pub inactivity_timeout_ms: u32,
    pub edit_step_ms: u32,
    pub button_debounce_ms: u32,
    pub encoder_counts_per_detent: u8,
    pub settings_save_debounce_ms: u32,
    #[serde(default)]
    pub override_motion_policy: OverrideMotionPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff_ms: 5_000,
            sensor_poll_interval_ms: 1_000,
            display_refresh_interval_ms: 100,
            telemetry_interval_ms: 10_000,
            inactivity_timeout_ms: 30_000,
            edit_step_ms: 30_000,
            button_debounce_ms: 50,
            encoder_counts_per_detent: 1,
            settings_save_debounce_ms: 5_000,
            override_motion_policy: OverrideMotionPolicy::Ignore,
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        self.reconnect_backoff_ms = self.reconnect_backoff_ms.max(1_000);
        self.sensor_poll_interval_ms = self.sensor_poll_interval_ms.max(100);
        self.display_refresh_interval_ms = self.display_refresh_interval_ms.max(20);
        self.telemetry_interval_ms = self.telemetry_interval_ms.max(1_000);
        self.inactivity_timeout_ms = self.inactivity_timeout_ms.max(1_000);
        self.edit_step_ms = self.edit_step_ms.clamp(1_000, MAX_TIMER_MS);
        self.encoder_counts_per_detent = self.encoder_counts_per_detent.max(1);
        self.settings_save_debounce_ms = self.settings_save_debounce_ms.max(250);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub client_id: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.0.70".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            client_id: "shed_esp32_c6_01".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub timers: TimerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.controller.sanitize();
        self.timers.sanitize();
    }
}
