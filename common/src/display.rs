//! Read-only view of the loop state handed to the renderer, plus the text
//! layout shared by the device screen and the host log renderer.

use crate::{
    config::{TimerConfig, TimerKind},
    types::{PowerReading, POWER_CHANNELS},
    ui::{DisplayMode, LightsView, MenuItem, PowerView, UiState},
};

pub const CHANNEL_LABELS: [&str; POWER_CHANNELS] = ["Solar Panel", "Battery", "Output"];

#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySnapshot {
    pub ui: UiState,
    pub light_on: bool,
    pub override_active: bool,
    pub motion: bool,
    pub connected: bool,
    pub remaining_ms: u32,
    pub current_on_ms: u32,
    pub previous_on_ms: u32,
    pub total_on_ms: u64,
    pub trigger_count: u32,
    pub timers: TimerConfig,
    pub readings: [PowerReading; POWER_CHANNELS],
}

/// `HH:MM:SS`; hours keep counting past 99.
pub fn format_duration(ms: u64) -> String {
    let secs = ms / 1_000;
    format!("{:02}:{:02}:{:02}", secs / 3_600, (secs / 60) % 60, secs % 60)
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// Lays the snapshot out as screen rows, top to bottom.
pub fn screen_lines(snapshot: &DisplaySnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    let link = if snapshot.connected { "MQTT" } else { "----" };
    lines.push(format!("{:<12}{link:>4}", snapshot.ui.mode.as_str()));

    match snapshot.ui.mode {
        DisplayMode::PowerAll => {
            for (label, reading) in CHANNEL_LABELS.iter().zip(snapshot.readings.iter()) {
                lines.push(label.to_string());
                lines.push(format!(
                    " {:>6.2}V {:>6.3}A {:>6.2}W",
                    reading.bus_voltage, reading.current, reading.power
                ));
            }
        }
        DisplayMode::PowerCh1 | DisplayMode::PowerCh2 | DisplayMode::PowerCh3 => {
            let channel = snapshot.ui.mode.power_channel().unwrap_or_default();
            let reading = &snapshot.readings[channel];
            lines.push(CHANNEL_LABELS[channel].to_string());
            match snapshot.ui.power {
                PowerView::Live => {
                    lines.push(format!("Voltage {:>8.2} V", reading.bus_voltage));
                    lines.push(format!("Current {:>8.3} A", reading.current));
                    lines.push(format!("Power   {:>8.2} W", reading.power));
                }
                PowerView::Sub => {
                    lines.push(format!("Shunt {:>8.2} mV", reading.shunt_voltage * 1_000.0));
                    lines.push(format!("Bus   {:>8.3} V", reading.bus_voltage));
                }
            }
        }
        DisplayMode::Lights => lights_lines(snapshot, &mut lines),
    }

    lines
}

fn lights_lines(snapshot: &DisplaySnapshot, lines: &mut Vec<String>) {
    match snapshot.ui.lights {
        LightsView::LiveStatus => {
            let mode = if snapshot.override_active {
                "manual"
            } else {
                "auto"
            };
            lines.push(format!("Light {} ({mode})", on_off(snapshot.light_on)));
            lines.push(format!("Motion {}", on_off(snapshot.motion)));
            if snapshot.light_on {
                lines.push(format!(
                    "Off in  {}",
                    format_duration(u64::from(snapshot.remaining_ms))
                ));
                lines.push(format!(
                    "On for  {}",
                    format_duration(u64::from(snapshot.current_on_ms))
                ));
            } else {
                lines.push(format!(
                    "Last    {}",
                    format_duration(u64::from(snapshot.previous_on_ms))
                ));
            }
            lines.push(format!("Total   {}", format_duration(snapshot.total_on_ms)));
            lines.push(format!("Triggers {}", snapshot.trigger_count));
        }
        LightsView::Menu(selected) => {
            for item in MenuItem::ALL {
                let cursor = if item == selected { '>' } else { ' ' };
                let detail = match item {
                    MenuItem::ToggleLight => on_off(snapshot.light_on).to_string(),
                    MenuItem::MotionTimer => {
                        format_timer(snapshot.timers.get(TimerKind::Motion))
                    }
                    MenuItem::ManualTimer => {
                        format_timer(snapshot.timers.get(TimerKind::Manual))
                    }
                    MenuItem::Exit => String::new(),
                };
                lines.push(format!("{cursor}{:<13}{detail}", item.label()));
            }
        }
        LightsView::EditMotionTimer { staged_ms } | LightsView::EditManualTimer { staged_ms } => {
            let kind = snapshot
                .ui
                .staged_edit()
                .map(|(kind, _)| kind)
                .unwrap_or(TimerKind::Motion);
            lines.push(format!("Set {kind} timer"));
            lines.push(format!("  < {} >", format_timer(staged_ms)));
            lines.push(format!("was {}", format_timer(snapshot.timers.get(kind))));
            lines.push("click to save".to_string());
        }
    }
}

fn format_timer(ms: u32) -> String {
    let secs = ms / 1_000;
    format!("{}m{:02}s", secs / 60, secs % 60)
}
