//! Action mini-language: the steps a triggered task executes.

use serde::{Deserialize, Serialize};

use crate::variables::VariableUpdate;

/// Pause after an action when none is given, in seconds.
pub const DEFAULT_DELAY_AFTER: f64 = 0.1;

fn default_delay_after() -> f64 {
    DEFAULT_DELAY_AFTER
}

fn default_long_click_ms() -> u64 {
    1000
}

fn default_swipe_ms() -> u64 {
    300
}

fn default_wait_seconds() -> f64 {
    1.0
}

fn default_speed() -> f64 {
    1.0
}

/// One step with its trailing pause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    /// Seconds to sleep after the step.
    #[serde(default = "default_delay_after")]
    pub delay_after: f64,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            delay_after: DEFAULT_DELAY_AFTER,
        }
    }

    pub fn with_delay(mut self, delay_after: f64) -> Self {
        self.delay_after = delay_after;
        self
    }
}

impl From<ActionKind> for Action {
    fn from(kind: ActionKind) -> Self {
        Action::new(kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Single tap.
    Click { x: i32, y: i32 },
    /// Press and hold at one point.
    LongClick {
        x: i32,
        y: i32,
        #[serde(default = "default_long_click_ms")]
        duration_ms: u64,
    },
    /// Straight swipe.
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        #[serde(default = "default_swipe_ms")]
        duration_ms: u64,
    },
    /// Type text.
    Text { text: String },
    /// Android key event.
    Key {
        keycode: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_name: Option<String>,
    },
    /// Sleep.
    Wait {
        #[serde(default = "default_wait_seconds")]
        seconds: f64,
    },
    /// Replay a stored recording through the playback scheduler.
    PlayRecording {
        recording: String,
        #[serde(default = "default_speed")]
        speed: f64,
        #[serde(default)]
        use_random: bool,
    },
    /// Mutate a session variable.
    SetVariable(VariableUpdate),
    /// Raw device shell command.
    ShellCommand { command: String },
}

impl ActionKind {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Click { .. } => "click",
            ActionKind::LongClick { .. } => "long_click",
            ActionKind::Swipe { .. } => "swipe",
            ActionKind::Text { .. } => "text",
            ActionKind::Key { .. } => "key",
            ActionKind::Wait { .. } => "wait",
            ActionKind::PlayRecording { .. } => "play_recording",
            ActionKind::SetVariable(_) => "set_variable",
            ActionKind::ShellCommand { .. } => "shell_command",
        }
    }
}
