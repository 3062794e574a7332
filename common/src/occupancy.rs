use log::info;

use crate::{
    config::{ConfigError, OverrideMotionPolicy, TimerConfig, TimerKind, MAX_TIMER_MS},
    scheduler::{elapsed_ms, Millis},
    timer_policy::active_duration,
    types::StatusEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Auto,
    ManualOverride,
}

/// Motion/override light controller.
///
/// The relay is on exactly while the time since the last counted activity is
/// below the active timer duration. Motion edges and the external ON/OFF
/// commands only move the activity timestamp and the override flag; the
/// relay itself is changed in one place, [`OccupancyEngine::tick`].
#[derive(Debug, Clone)]
pub struct OccupancyEngine {
    timers: TimerConfig,
    policy: OverrideMotionPolicy,

    mode: ControlMode,
    light_on: bool,
    motion_sample: bool,

    last_motion_ms: Option<Millis>,
    light_on_ms: Option<Millis>,

    trigger_count: u32,
    total_on_ms: u64,
    previous_on_ms: u32,
}

impl OccupancyEngine {
    pub fn new(mut timers: TimerConfig, policy: OverrideMotionPolicy) -> Self {
        timers.sanitize();
        Self {
            timers,
            policy,
            mode: ControlMode::Auto,
            light_on: false,
            motion_sample: false,
            last_motion_ms: None,
            light_on_ms: None,
            trigger_count: 0,
            total_on_ms: 0,
            previous_on_ms: 0,
        }
    }

    pub fn timers(&self) -> &TimerConfig {
        &self.timers
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn is_override_active(&self) -> bool {
        self.mode == ControlMode::ManualOverride
    }

    pub fn is_light_on(&self) -> bool {
        self.light_on
    }

    pub fn motion_detected(&self) -> bool {
        self.motion_sample
    }

    pub fn last_motion_ms(&self) -> Option<Millis> {
        self.last_motion_ms
    }

    pub fn light_on_ms(&self) -> Option<Millis> {
        self.light_on_ms
    }

    pub fn trigger_count(&self) -> u32 {
        self.trigger_count
    }

    pub fn total_on_ms(&self) -> u64 {
        self.total_on_ms
    }

    pub fn previous_on_ms(&self) -> u32 {
        self.previous_on_ms
    }

    pub fn active_duration_ms(&self) -> u32 {
        active_duration(self.is_override_active(), &self.timers)
    }

    /// Time left before the light turns off, zero while it is off.
    pub fn remaining_ms(&self, now: Millis) -> u32 {
        if !self.light_on {
            return 0;
        }
        match self.last_motion_ms {
            Some(last) => self
                .active_duration_ms()
                .saturating_sub(elapsed_ms(now, last)),
            None => 0,
        }
    }

    pub fn current_on_ms(&self, now: Millis) -> u32 {
        match self.light_on_ms {
            Some(start) if self.light_on => elapsed_ms(now, start),
            _ => 0,
        }
    }

    pub fn set_timer_seconds(&mut self, kind: TimerKind, seconds: u32) -> Result<bool, ConfigError> {
        self.timers.set_from_seconds(kind, seconds)
    }

    /// Clamped write used by the local UI after an edit is confirmed.
    pub fn commit_timer(&mut self, kind: TimerKind, duration_ms: u32) -> bool {
        self.timers.set(kind, duration_ms)
    }

    pub fn tick(&mut self, now: Millis, motion: bool) -> Vec<StatusEvent> {
        let mut events = Vec::new();

        self.sample_motion(motion, now, &mut events);
        self.forget_stale_activity(now);

        let duration = self.active_duration_ms();
        let relay_should_be_on = self
            .last_motion_ms
            .map(|last| elapsed_ms(now, last) < duration)
            .unwrap_or(false);

        if relay_should_be_on && !self.light_on {
            self.turn_light_on(now, &mut events);
        } else if !relay_should_be_on && self.light_on {
            self.turn_light_off(now, &mut events);
        }

        events
    }

    /// External ON: start (or restart) the manual override window.
    pub fn manual_on(&mut self, now: Millis) -> Vec<StatusEvent> {
        let was_overridden = self.is_override_active();
        self.mode = ControlMode::ManualOverride;
        self.last_motion_ms = Some(now);
        info!("manual override on for {}s", self.timers.manual_duration_ms / 1_000);

        if was_overridden {
            Vec::new()
        } else {
            vec![StatusEvent::OverrideActive]
        }
    }

    /// External OFF: leave override and push the activity timestamp just past
    /// the active window so the next tick turns the light off.
    pub fn manual_off(&mut self, now: Millis) -> Vec<StatusEvent> {
        let was_overridden = self.is_override_active();
        self.mode = ControlMode::Auto;

        let duration = self.active_duration_ms();
        self.last_motion_ms = Some(now.wrapping_sub(duration).wrapping_sub(1));
        info!("manual off requested");

        if was_overridden {
            vec![StatusEvent::OverrideCleared]
        } else {
            Vec::new()
        }
    }

    /// Local UI toggle: OFF while lit, ON otherwise.
    pub fn toggle(&mut self, now: Millis) -> Vec<StatusEvent> {
        if self.light_on {
            self.manual_off(now)
        } else {
            self.manual_on(now)
        }
    }

    fn sample_motion(&mut self, motion: bool, now: Millis, events: &mut Vec<StatusEvent>) {
        if motion == self.motion_sample {
            return;
        }
        self.motion_sample = motion;
        events.push(StatusEvent::Motion(motion));

        if !motion {
            return;
        }

        match (self.mode, self.policy) {
            (ControlMode::Auto, _) | (ControlMode::ManualOverride, OverrideMotionPolicy::Refresh) => {
                self.last_motion_ms = Some(now);
            }
            (ControlMode::ManualOverride, OverrideMotionPolicy::Ignore) => {
                info!("motion during manual override; override window unchanged");
            }
        }
    }

    // No duration exceeds MAX_TIMER_MS, so an older timestamp can only ever
    // mean "off". Dropping it keeps the u32 uptime wrap from reviving it.
    fn forget_stale_activity(&mut self, now: Millis) {
        if let Some(last) = self.last_motion_ms {
            if elapsed_ms(now, last) > MAX_TIMER_MS {
                self.last_motion_ms = None;
            }
        }
    }

    fn turn_light_on(&mut self, now: Millis, events: &mut Vec<StatusEvent>) {
        self.light_on = true;
        self.light_on_ms = Some(now);
        self.trigger_count = self.trigger_count.saturating_add(1);
        info!(
            "light on ({:?}, timeout {}s)",
            self.mode,
            self.active_duration_ms() / 1_000
        );

        events.push(StatusEvent::Occupancy(true));
        events.push(StatusEvent::Light(true));
        events.push(StatusEvent::Triggered(self.trigger_count));
    }

    fn turn_light_off(&mut self, now: Millis, events: &mut Vec<StatusEvent>) {
        let on_for = self.current_on_ms(now);
        self.light_on = false;
        self.light_on_ms = None;
        self.total_on_ms = self.total_on_ms.saturating_add(u64::from(on_for));
        self.previous_on_ms = on_for;
        info!("light off after {}s", on_for / 1_000);

        events.push(StatusEvent::Occupancy(false));
        events.push(StatusEvent::Light(false));

        if self.is_override_active() {
            self.mode = ControlMode::Auto;
            events.push(StatusEvent::OverrideCleared);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(motion_ms: u32, manual_ms: u32) -> OccupancyEngine {
        OccupancyEngine::new(
            TimerConfig {
                motion_duration_ms: motion_ms,
                manual_duration_ms: manual_ms,
            },
            OverrideMotionPolicy::Ignore,
        )
    }

    #[test]
    fn stays_off_at_boot_without_motion() {
        let mut engine = engine_with(10_000, 300_000);

        assert!(engine.tick(0, false).is_empty());
        assert!(engine.tick(5_000, false).is_empty());
        assert!(!engine.is_light_on());
    }

    #[test]
    fn motion_turns_light_on_then_expires() {
        let mut engine = engine_with(10_000, 300_000);

        let events = engine.tick(0, true);
        assert_eq!(
            events,
            vec![
                StatusEvent::Motion(true),
                StatusEvent::Occupancy(true),
                StatusEvent::Light(true),
                StatusEvent::Triggered(1),
            ]
        );
        assert_eq!(engine.light_on_ms(), Some(0));

        assert_eq!(engine.tick(1, false), vec![StatusEvent::Motion(false)]);
        assert!(engine.tick(9_999, false).is_empty());
        assert!(engine.is_light_on());

        let events = engine.tick(10_001, false);
        assert_eq!(
            events,
            vec![StatusEvent::Occupancy(false), StatusEvent::Light(false)]
        );
        assert!(!engine.is_light_on());
        assert_eq!(engine.previous_on_ms(), 10_001);
        assert_eq!(engine.total_on_ms(), 10_001);
    }

    #[test]
    fn only_rising_edges_restart_the_timer() {
        let mut engine = engine_with(10_000, 300_000);

        engine.tick(0, true);
        // Held high: no new edge, the window still runs from t=0.
        assert!(engine.tick(5_000, true).is_empty());
        let events = engine.tick(10_000, true);
        assert!(events.contains(&StatusEvent::Light(false)));

        engine.tick(10_500, false);
        let events = engine.tick(11_000, true);
        assert!(events.contains(&StatusEvent::Light(true)));
        assert_eq!(engine.trigger_count(), 2);
    }

    #[test]
    fn repeated_tick_at_same_instant_is_idempotent() {
        let mut engine = engine_with(10_000, 300_000);

        assert!(!engine.tick(100, true).is_empty());
        assert!(engine.tick(100, true).is_empty());
        assert!(engine.tick(100, true).is_empty());

        assert!(!engine.tick(10_100, false).is_empty());
        assert!(engine.tick(10_100, false).is_empty());
    }

    #[test]
    fn off_command_expires_override_on_next_tick() {
        let mut engine = engine_with(10_000, 300_000);
        assert_eq!(engine.manual_on(0), vec![StatusEvent::OverrideActive]);
        // A repeated ON restarts the window without a second edge.
        assert!(engine.manual_on(0).is_empty());
        engine.tick(0, false);
        assert!(engine.is_light_on());
        assert!(engine.is_override_active());

        let events = engine.manual_off(1_000);
        assert_eq!(events, vec![StatusEvent::OverrideCleared]);
        assert!(!engine.is_override_active());

        let events = engine.tick(1_000, false);
        assert_eq!(
            events,
            vec![StatusEvent::Occupancy(false), StatusEvent::Light(false)]
        );
    }

    #[test]
    fn off_command_works_when_motion_timer_is_longer() {
        let mut engine = engine_with(3_600_000, 10_000);
        engine.manual_on(0);
        engine.tick(0, false);

        engine.manual_off(5_000);
        engine.tick(5_000, false);

        assert!(!engine.is_light_on());
    }

    #[test]
    fn motion_during_override_does_not_extend_window() {
        let mut engine = engine_with(10_000, 300_000);
        engine.manual_on(0);
        engine.tick(0, false);

        assert_eq!(engine.tick(1_000, true), vec![StatusEvent::Motion(true)]);
        assert_eq!(engine.last_motion_ms(), Some(0));

        engine.tick(2_000, false);
        assert!(engine.tick(299_999, false).is_empty());
        assert!(engine.is_light_on());

        let events = engine.tick(300_000, false);
        assert_eq!(
            events,
            vec![
                StatusEvent::Occupancy(false),
                StatusEvent::Light(false),
                StatusEvent::OverrideCleared,
            ]
        );
        assert_eq!(engine.mode(), ControlMode::Auto);
    }

    #[test]
    fn refresh_policy_extends_override_on_motion() {
        let mut engine = OccupancyEngine::new(
            TimerConfig {
                motion_duration_ms: 10_000,
                manual_duration_ms: 300_000,
            },
            OverrideMotionPolicy::Refresh,
        );
        engine.manual_on(0);
        engine.tick(0, false);
        engine.tick(1_000, true);

        assert_eq!(engine.last_motion_ms(), Some(1_000));
        assert!(engine.tick(300_500, false).is_empty());
        assert!(engine.is_light_on());
    }

    #[test]
    fn toggle_flips_the_light_through_the_override_path() {
        let mut engine = engine_with(10_000, 300_000);

        assert_eq!(engine.toggle(0), vec![StatusEvent::OverrideActive]);
        engine.tick(0, false);
        assert!(engine.is_light_on());
        assert!(engine.is_override_active());

        assert_eq!(engine.toggle(50), vec![StatusEvent::OverrideCleared]);
        engine.tick(50, false);
        assert!(!engine.is_light_on());
    }

    #[test]
    fn remaining_time_counts_down() {
        let mut engine = engine_with(10_000, 300_000);
        engine.tick(1_000, true);

        assert_eq!(engine.remaining_ms(1_000), 10_000);
        assert_eq!(engine.remaining_ms(4_000), 7_000);
        assert_eq!(engine.current_on_ms(4_000), 3_000);
    }

    #[test]
    fn timer_window_survives_uptime_wrap() {
        let mut engine = engine_with(10_000, 300_000);
        let start = u32::MAX - 2_000;
        engine.tick(start, true);

        assert!(engine.tick(5_000, false).contains(&StatusEvent::Motion(false)));
        assert!(engine.is_light_on());
        assert!(engine.tick(8_000, false).contains(&StatusEvent::Light(false)));
    }

    #[test]
    fn stale_activity_never_aliases_after_wrap() {
        let mut engine = engine_with(10_000, 300_000);
        engine.tick(0, true);
        engine.tick(20_000, false);
        assert!(!engine.is_light_on());

        engine.tick(MAX_TIMER_MS + 1, false);
        assert_eq!(engine.last_motion_ms(), None);

        // Once the counter wraps, a kept timestamp of 0 would look fresh here.
        assert!(engine.tick(5, false).is_empty());
        assert!(!engine.is_light_on());
    }

    #[test]
    fn rejected_timer_value_keeps_previous_config() {
        let mut engine = engine_with(10_000, 300_000);

        assert!(engine.set_timer_seconds(TimerKind::Motion, 9).is_err());
        assert!(engine.set_timer_seconds(TimerKind::Motion, 3_601).is_err());
        assert_eq!(engine.timers().motion_duration_ms, 10_000);

        assert_eq!(engine.set_timer_seconds(TimerKind::Motion, 3_600), Ok(true));
        assert_eq!(engine.timers().motion_duration_ms, 3_600_000);
    }
}
