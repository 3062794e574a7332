use crate::config::TimerConfig;

/// The light timeout currently in force: the manual duration while an
/// override is active, the motion duration otherwise.
pub fn active_duration(override_active: bool, cfg: &TimerConfig) -> u32 {
    if override_active {
        cfg.manual_duration_ms
    } else {
        cfg.motion_duration_ms
    }
}
