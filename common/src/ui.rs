//! Encoder-driven screen navigation.
//!
//! ```text
//! PowerAll <-> PowerCh1 <-> PowerCh2 <-> PowerCh3 <-> Lights <-> (PowerAll)
//!                 |click        |click      |click       |click
//!                Sub           Sub         Sub         Menu --click--> item
//!                                                        |                 |
//!                                          Edit{Motion,Manual}Timer <------+
//!                                                        |click = commit
//! ```
//!
//! Inactivity resets everything to `PowerAll / LiveStatus / Live`.

use crate::{
    config::{clamp_timer_ms, TimerConfig, TimerKind},
    scheduler::{elapsed_ms, Millis},
};

pub const NUM_MODES: usize = 5;
pub const NUM_MENU_ITEMS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    PowerAll,
    PowerCh1,
    PowerCh2,
    PowerCh3,
    Lights,
}

impl DisplayMode {
    pub const ALL: [Self; NUM_MODES] = [
        Self::PowerAll,
        Self::PowerCh1,
        Self::PowerCh2,
        Self::PowerCh3,
        Self::Lights,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::PowerAll => 0,
            Self::PowerCh1 => 1,
            Self::PowerCh2 => 2,
            Self::PowerCh3 => 3,
            Self::Lights => 4,
        }
    }

    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % NUM_MODES]
    }

    pub fn step(self, forward: bool) -> Self {
        let offset = if forward { 1 } else { NUM_MODES - 1 };
        Self::from_index(self.index() + offset)
    }

    /// Zero-based power channel shown by this mode.
    pub fn power_channel(self) -> Option<usize> {
        match self {
            Self::PowerCh1 => Some(0),
            Self::PowerCh2 => Some(1),
            Self::PowerCh3 => Some(2),
            Self::PowerAll | Self::Lights => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PowerAll => "POWER",
            Self::PowerCh1 => "CH1",
            Self::PowerCh2 => "CH2",
            Self::PowerCh3 => "CH3",
            Self::Lights => "LIGHTS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem {
    ToggleLight,
    MotionTimer,
    ManualTimer,
    Exit,
}

impl MenuItem {
    pub const ALL: [Self; NUM_MENU_ITEMS] = [
        Self::ToggleLight,
        Self::MotionTimer,
        Self::ManualTimer,
        Self::Exit,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::ToggleLight => 0,
            Self::MotionTimer => 1,
            Self::ManualTimer => 2,
            Self::Exit => 3,
        }
    }

    pub fn step(self, forward: bool) -> Self {
        let offset = if forward { 1 } else { NUM_MENU_ITEMS - 1 };
        Self::ALL[(self.index() + offset) % NUM_MENU_ITEMS]
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::ToggleLight => "Toggle light",
            Self::MotionTimer => "Motion timer",
            Self::ManualTimer => "Manual timer",
            Self::Exit => "Exit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightsView {
    #[default]
    LiveStatus,
    Menu(MenuItem),
    EditMotionTimer {
        staged_ms: u32,
    },
    EditManualTimer {
        staged_ms: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerView {
    #[default]
    Live,
    Sub,
}

impl PowerView {
    fn toggled(self) -> Self {
        match self {
            Self::Live => Self::Sub,
            Self::Sub => Self::Live,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UiState {
    pub mode: DisplayMode,
    pub lights: LightsView,
    pub power: PowerView,
}

impl UiState {
    pub fn menu_selection(&self) -> Option<MenuItem> {
        match (self.mode, self.lights) {
            (DisplayMode::Lights, LightsView::Menu(item)) => Some(item),
            _ => None,
        }
    }

    pub fn staged_edit(&self) -> Option<(TimerKind, u32)> {
        match (self.mode, self.lights) {
            (DisplayMode::Lights, LightsView::EditMotionTimer { staged_ms }) => {
                Some((TimerKind::Motion, staged_ms))
            }
            (DisplayMode::Lights, LightsView::EditManualTimer { staged_ms }) => {
                Some((TimerKind::Manual, staged_ms))
            }
            _ => None,
        }
    }
}

/// Requests the navigator hands back to the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    ToggleLight,
    CommitTimer { kind: TimerKind, duration_ms: u32 },
}

#[derive(Debug, Clone)]
pub struct UiNavigator {
    state: UiState,
    last_input_ms: Millis,
    inactivity_timeout_ms: u32,
    edit_step_ms: u32,
}

impl UiNavigator {
    pub fn new(inactivity_timeout_ms: u32, edit_step_ms: u32, now: Millis) -> Self {
        Self {
            state: UiState::default(),
            last_input_ms: now,
            inactivity_timeout_ms,
            edit_step_ms,
        }
    }

    pub fn state(&self) -> &UiState {
        &self.state
    }

    pub fn last_input_ms(&self) -> Millis {
        self.last_input_ms
    }

    /// Global escape: back to the default screen after the inactivity
    /// timeout. Any staged edit is dropped. Returns true when the state was
    /// actually reset.
    pub fn expire_if_inactive(&mut self, now: Millis) -> bool {
        if elapsed_ms(now, self.last_input_ms) < self.inactivity_timeout_ms {
            return false;
        }
        if self.state == UiState::default() {
            return false;
        }
        self.state = UiState::default();
        true
    }

    pub fn on_rotate(&mut self, delta: i32, now: Millis) {
        if delta == 0 {
            return;
        }
        self.last_input_ms = now;
        let forward = delta > 0;

        match self.state.mode {
            DisplayMode::Lights => match &mut self.state.lights {
                LightsView::LiveStatus => self.state.mode = self.state.mode.step(forward),
                LightsView::Menu(item) => *item = item.step(forward),
                LightsView::EditMotionTimer { staged_ms }
                | LightsView::EditManualTimer { staged_ms } => {
                    *staged_ms = adjust_staged(*staged_ms, self.edit_step_ms, forward);
                }
            },
            DisplayMode::PowerCh1 | DisplayMode::PowerCh2 | DisplayMode::PowerCh3 => {
                if self.state.power == PowerView::Live {
                    self.state.mode = self.state.mode.step(forward);
                }
            }
            DisplayMode::PowerAll => self.state.mode = self.state.mode.step(forward),
        }
    }

    /// Context-dependent select. Edit states are seeded from `timers` and
    /// only reach the live config through the returned commit command.
    pub fn on_click(&mut self, now: Millis, timers: &TimerConfig) -> Option<UiCommand> {
        self.last_input_ms = now;

        match self.state.mode {
            DisplayMode::PowerAll => None,
            DisplayMode::PowerCh1 | DisplayMode::PowerCh2 | DisplayMode::PowerCh3 => {
                self.state.power = self.state.power.toggled();
                None
            }
            DisplayMode::Lights => self.click_lights(timers),
        }
    }

    fn click_lights(&mut self, timers: &TimerConfig) -> Option<UiCommand> {
        let (next, command) = match self.state.lights {
            LightsView::LiveStatus => (LightsView::Menu(MenuItem::ToggleLight), None),
            LightsView::Menu(MenuItem::ToggleLight) => {
                (LightsView::LiveStatus, Some(UiCommand::ToggleLight))
            }
            LightsView::Menu(MenuItem::MotionTimer) => (
                LightsView::EditMotionTimer {
                    staged_ms: timers.motion_duration_ms,
                },
                None,
            ),
            LightsView::Menu(MenuItem::ManualTimer) => (
                LightsView::EditManualTimer {
                    staged_ms: timers.manual_duration_ms,
                },
                None,
            ),
            LightsView::Menu(MenuItem::Exit) => (LightsView::LiveStatus, None),
            LightsView::EditMotionTimer { staged_ms } => (
                LightsView::Menu(MenuItem::MotionTimer),
                Some(UiCommand::CommitTimer {
                    kind: TimerKind::Motion,
                    duration_ms: staged_ms,
                }),
            ),
            LightsView::EditManualTimer { staged_ms } => (
                LightsView::Menu(MenuItem::ManualTimer),
                Some(UiCommand::CommitTimer {
                    kind: TimerKind::Manual,
                    duration_ms: staged_ms,
                }),
            ),
        };

        self.state.lights = next;
        command
    }
}

fn adjust_staged(staged_ms: u32, step_ms: u32, forward: bool) -> u32 {
    let next = if forward {
        staged_ms.saturating_add(step_ms)
    } else {
        staged_ms.saturating_sub(step_ms)
    };
    clamp_timer_ms(next)
}
