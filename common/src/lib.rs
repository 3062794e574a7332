pub mod commands;
pub mod config;
pub mod display;
pub mod hal;
pub mod ina3221;
pub mod input;
pub mod occupancy;
pub mod runtime;
pub mod scheduler;
pub mod sensor;
pub mod sh1107;
pub mod timer_policy;
pub mod topics;
pub mod types;
pub mod ui;

pub use commands::{parse_command, Command, CommandError};
pub use config::{
    ConfigError, ControllerConfig, NetworkConfig, OverrideMotionPolicy, RuntimeConfig, TimerConfig,
    TimerKind,
};
pub use display::{format_duration, screen_lines, DisplaySnapshot};
pub use hal::{Board, Display, DisplayError, PowerMonitor, SensorError, Transport, TransportError};
pub use occupancy::{ControlMode, OccupancyEngine};
pub use runtime::{MainLoop, StartupError};
pub use scheduler::{elapsed_ms, IntervalGate, Millis, TaskScheduler};
pub use topics::*;
pub use types::{InboundMessage, PowerReading, Publication, StatusEvent};
pub use ui::{DisplayMode, UiNavigator, UiState};
