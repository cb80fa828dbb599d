//! Gesture recorder: turns raw touch samples into recorded actions.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::recording::{RecordedAction, RecordedKind};
use crate::trajectory::{simplify, TrajectoryPoint};

/// Configuration for the recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Move samples closer than this to the last kept point are dropped (px).
    pub dead_zone_px: f64,
    /// Touches travelling further than this become swipes (px).
    pub swipe_threshold_px: f64,
    /// Stationary touches held at least this long become long clicks.
    pub long_press_ms: u64,
    /// Douglas-Peucker epsilon. Derived from the path length when unset.
    pub epsilon: Option<f64>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            dead_zone_px: 20.0,
            swipe_threshold_px: 50.0,
            long_press_ms: 500,
            epsilon: None,
        }
    }
}

/// State of the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecorderState {
    #[default]
    Idle,
    Recording,
    Paused,
}

/// Events emitted by the recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecorderEvent {
    StateChanged { old: RecorderState, new: RecorderState },
    /// An action was finalized.
    ActionCaptured { action_count: usize, duration_ms: u64 },
    RecordingCompleted { actions: Vec<RecordedAction> },
}

/// Raw touch samples from the input source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchEvent {
    Down { x: i32, y: i32 },
    Move { x: i32, y: i32 },
    Up { x: i32, y: i32 },
}

/// Touch in progress.
#[derive(Debug)]
struct ActiveTouch {
    points: Vec<TrajectoryPoint>,
}

impl ActiveTouch {
    fn first(&self) -> TrajectoryPoint {
        self.points[0]
    }

    fn last(&self) -> TrajectoryPoint {
        self.points[self.points.len() - 1]
    }
}

pub struct Recorder {
    config: RecorderConfig,
    state: RecorderState,
    actions: Vec<RecordedAction>,
    touch: Option<ActiveTouch>,
    pause_started_ms: Option<u64>,
    total_paused_ms: u64,
    last_timestamp_ms: u64,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            state: RecorderState::Idle,
            actions: Vec::new(),
            touch: None,
            pause_started_ms: None,
            total_paused_ms: 0,
            last_timestamp_ms: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RecorderConfig::default())
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Recorded time so far, pauses excluded.
    pub fn duration_ms(&self) -> u64 {
        self.last_timestamp_ms
    }

    fn transition(&mut self, new: RecorderState) -> RecorderEvent {
        let old = self.state;
        self.state = new;
        RecorderEvent::StateChanged { old, new }
    }

    pub fn start(&mut self) -> Option<RecorderEvent> {
        if self.state != RecorderState::Idle {
            return None;
        }
        self.actions.clear();
        self.touch = None;
        self.pause_started_ms = None;
        self.total_paused_ms = 0;
        self.last_timestamp_ms = 0;

        info!("Recording started");
        Some(self.transition(RecorderState::Recording))
    }

    /// Pause at session time `at_ms`.
    pub fn pause(&mut self, at_ms: u64) -> Option<RecorderEvent> {
        if self.state != RecorderState::Recording {
            return None;
        }
        self.pause_started_ms = Some(at_ms);
        info!("Recording paused");
        Some(self.transition(RecorderState::Paused))
    }

    /// Resume at session time `at_ms`; the paused span is cut from later timestamps.
    pub fn resume(&mut self, at_ms: u64) -> Option<RecorderEvent> {
        if self.state != RecorderState::Paused {
            return None;
        }
        if let Some(started) = self.pause_started_ms.take() {
            self.total_paused_ms += at_ms.saturating_sub(started);
        }
        info!(paused_ms = self.total_paused_ms, "Recording resumed");
        Some(self.transition(RecorderState::Recording))
    }

    /// Stop and hand back the captured actions. A touch still held is dropped.
    pub fn stop(&mut self) -> Option<RecorderEvent> {
        if self.state == RecorderState::Idle {
            return None;
        }
        self.state = RecorderState::Idle;
        if self.touch.take().is_some() {
            debug!("discarding unfinished touch");
        }

        let actions = std::mem::take(&mut self.actions);
        info!("Recording stopped, captured {} actions", actions.len());
        Some(RecorderEvent::RecordingCompleted { actions })
    }

    fn adjust(&mut self, timestamp_ms: u64) -> i64 {
        let adjusted = timestamp_ms.saturating_sub(self.total_paused_ms);
        self.last_timestamp_ms = self.last_timestamp_ms.max(adjusted);
        adjusted as i64
    }

    fn captured(&mut self, action: RecordedAction) -> RecorderEvent {
        debug!(?action.kind, start = action.start_time_ms, "captured action");
        self.actions.push(action);
        RecorderEvent::ActionCaptured {
            action_count: self.actions.len(),
            duration_ms: self.duration_ms(),
        }
    }

    /// Feed a touch sample taken at session time `timestamp_ms`.
    pub fn push_touch(&mut self, timestamp_ms: u64, event: TouchEvent) -> Option<RecorderEvent> {
        if self.state != RecorderState::Recording {
            return None;
        }
        let t = self.adjust(timestamp_ms);

        match event {
            TouchEvent::Down { x, y } => {
                self.touch = Some(ActiveTouch {
                    points: vec![TrajectoryPoint::new(x, y, t)],
                });
                None
            }
            TouchEvent::Move { x, y } => {
                let touch = self.touch.as_mut()?;
                let point = TrajectoryPoint::new(x, y, t);
                if point.distance_to(&touch.last()) > self.config.dead_zone_px {
                    touch.points.push(point);
                }
                None
            }
            TouchEvent::Up { x, y } => {
                let mut touch = self.touch.take()?;
                let end = TrajectoryPoint::new(x, y, t);
                let last = touch.last();
                if (last.x, last.y) != (x, y) {
                    touch.points.push(end);
                } else if touch.points.len() > 1 {
                    let n = touch.points.len();
                    touch.points[n - 1].t_ms = t;
                }
                let action = self.classify(touch, end);
                Some(self.captured(action))
            }
        }
    }

    fn classify(&self, touch: ActiveTouch, end: TrajectoryPoint) -> RecordedAction {
        let start = touch.first();
        let displacement = start.distance_to(&end);
        let held_ms = (end.t_ms - start.t_ms).max(0) as u64;

        if displacement > self.config.swipe_threshold_px {
            let kind = RecordedKind::Swipe {
                x1: start.x,
                y1: start.y,
                x2: end.x,
                y2: end.y,
            };
            let trajectory = simplify(&touch.points, self.config.epsilon);
            RecordedAction::spanning(kind, start.t_ms, end.t_ms).with_trajectory(trajectory)
        } else if held_ms >= self.config.long_press_ms {
            let kind = RecordedKind::LongClick { x: end.x, y: end.y };
            RecordedAction::spanning(kind, start.t_ms, end.t_ms)
        } else {
            // Presses land where the finger lifted.
            let kind = RecordedKind::Click { x: end.x, y: end.y };
            RecordedAction::spanning(kind, start.t_ms, end.t_ms)
        }
    }

    /// Record a key press.
    pub fn push_key(
        &mut self,
        timestamp_ms: u64,
        keycode: i32,
        key_name: Option<String>,
    ) -> Option<RecorderEvent> {
        if self.state != RecorderState::Recording {
            return None;
        }
        let t = self.adjust(timestamp_ms);
        Some(self.captured(RecordedAction::instant(RecordedKind::Key { keycode, key_name }, t)))
    }

    /// Record typed text.
    pub fn push_text(
        &mut self,
        timestamp_ms: u64,
        text: impl Into<String>,
    ) -> Option<RecorderEvent> {
        if self.state != RecorderState::Recording {
            return None;
        }
        let t = self.adjust(timestamp_ms);
        Some(self.captured(RecordedAction::instant(RecordedKind::Text { text: text.into() }, t)))
    }
}
