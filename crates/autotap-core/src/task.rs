//! Task model: what a trigger rule watches and what it runs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::action::Action;
use crate::condition::{Condition, ConditionLogic};
use crate::template::TemplateLibrary;

pub const SCHEME_VERSION: u32 = 1;
pub const DEFAULT_CHECK_INTERVAL: f64 = 0.5;

fn default_enabled() -> bool {
    true
}

fn default_cooldown() -> f64 {
    5.0
}

fn default_version() -> u32 {
    SCHEME_VERSION
}

fn default_check_interval() -> f64 {
    DEFAULT_CHECK_INTERVAL
}

/// One trigger rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: f64,
    /// Engine clock reading of the last firing. Runtime only.
    #[serde(skip)]
    pub last_executed_at: Option<Duration>,
    #[serde(flatten)]
    pub mode: TaskMode,
}

/// Trigger topology and its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskMode {
    /// One condition list, one action list.
    Legacy {
        #[serde(default)]
        unified_conditions: Vec<Condition>,
        #[serde(default)]
        condition_logic: ConditionLogic,
        #[serde(default)]
        actions: Vec<Action>,
    },
    /// Independent condition/action pairs; every matching pair fires.
    If {
        #[serde(default)]
        if_pairs: Vec<IfPair>,
    },
    /// A gate, then one sequence picked at random.
    Random {
        #[serde(default)]
        unified_conditions: Vec<Condition>,
        #[serde(default)]
        condition_logic: ConditionLogic,
        #[serde(default)]
        random_sequences: Vec<RandomSequence>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfPair {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub logic: ConditionLogic,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomSequence {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>, mode: TaskMode) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            cooldown_seconds: default_cooldown(),
            last_executed_at: None,
            mode,
        }
    }

    pub fn with_cooldown(mut self, seconds: f64) -> Self {
        self.cooldown_seconds = seconds;
        self
    }

    /// Whether the task is still cooling down at `now`.
    ///
    /// A task that has never fired is never in cooldown.
    pub fn in_cooldown(&self, now: Duration) -> bool {
        match self.last_executed_at {
            Some(last) => {
                let elapsed = now.saturating_sub(last).as_secs_f64();
                elapsed < self.cooldown_seconds
            }
            None => false,
        }
    }

    /// Every condition the task may evaluate, across all branches.
    pub fn conditions(&self) -> Box<dyn Iterator<Item = &Condition> + '_> {
        match &self.mode {
            TaskMode::Legacy {
                unified_conditions, ..
            }
            | TaskMode::Random {
                unified_conditions, ..
            } => Box::new(unified_conditions.iter()),
            TaskMode::If { if_pairs } => {
                Box::new(if_pairs.iter().flat_map(|p| p.conditions.iter()))
            }
        }
    }

    /// Whether any condition needs a captured frame.
    pub fn needs_frame(&self) -> bool {
        self.conditions().any(Condition::needs_frame)
    }

    pub fn mode_name(&self) -> &'static str {
        match self.mode {
            TaskMode::Legacy { .. } => "LEGACY",
            TaskMode::If { .. } => "IF",
            TaskMode::Random { .. } => "RANDOM",
        }
    }
}

/// A persisted task set with its embedded templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scheme {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Poll interval in seconds.
    #[serde(default = "default_check_interval")]
    pub check_interval: f64,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub templates: TemplateLibrary,
}

impl Default for Scheme {
    fn default() -> Self {
        Self {
            version: SCHEME_VERSION,
            check_interval: DEFAULT_CHECK_INTERVAL,
            tasks: Vec::new(),
            templates: TemplateLibrary::new(),
        }
    }
}
