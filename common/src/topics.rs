use crate::config::TimerKind;

pub const TOPIC_AVAILABILITY: &str = "shed/monitor/availability";
pub const TOPIC_DIAGNOSTIC: &str = "shed/monitor/diagnostic";

pub const TOPIC_MOTION_STATE: &str = "shed/monitor/motion/state";
pub const TOPIC_OCCUPANCY_STATE: &str = "shed/monitor/occupancy/state";

pub const TOPIC_LIGHT_STATE: &str = "shed/monitor/light/state";
pub const TOPIC_LIGHT_OVERRIDE_STATE: &str = "shed/monitor/light/override/state";
pub const TOPIC_LIGHT_COMMAND: &str = "shed/monitor/light/set";
pub const TOPIC_TRIGGER_COUNT: &str = "shed/monitor/light/triggers";

pub const TOPIC_MOTION_TIMER_STATE: &str = "shed/monitor/light/motion_timer/state";
pub const TOPIC_MOTION_TIMER_SET: &str = "shed/monitor/light/motion_timer/set";
pub const TOPIC_MANUAL_TIMER_STATE: &str = "shed/monitor/light/manual_timer/state";
pub const TOPIC_MANUAL_TIMER_SET: &str = "shed/monitor/light/manual_timer/set";

pub const TOPIC_POWER_CH1: &str = "shed/monitor/power/ch1";
pub const TOPIC_POWER_CH2: &str = "shed/monitor/power/ch2";
pub const TOPIC_POWER_CH3: &str = "shed/monitor/power/ch3";

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

pub const SUBSCRIBED_TOPICS: [&str; 3] = [
    TOPIC_LIGHT_COMMAND,
    TOPIC_MOTION_TIMER_SET,
    TOPIC_MANUAL_TIMER_SET,
];

pub const POWER_TOPICS: [&str; 3] = [TOPIC_POWER_CH1, TOPIC_POWER_CH2, TOPIC_POWER_CH3];

pub fn timer_state_topic(kind: TimerKind) -> &'static str {
    match kind {
        TimerKind::Motion => TOPIC_MOTION_TIMER_STATE,
        TimerKind::Manual => TOPIC_MANUAL_TIMER_STATE,
    }
}
