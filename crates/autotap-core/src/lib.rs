//! autotap-core: rule evaluation, action interpretation, playback scheduling
//! and trajectory handling.
//!
//! Design goal: keep this crate device-agnostic. Device I/O (adb commands,
//! screen capture, template matching) lives in `autotap-platform`.

mod action;
mod cancel;
mod clock;
mod condition;
mod config;
mod device;
mod engine;
mod interpreter;
mod player;
mod recorder;
mod recording;
mod storage;
mod task;
mod template;
pub mod trajectory;
mod variables;

pub use action::{Action, ActionKind, DEFAULT_DELAY_AFTER};
pub use cancel::CancelToken;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use condition::{
    CompareOp, Condition, ConditionEvaluator, ConditionLogic, Rect, MAX_THRESHOLD, MIN_THRESHOLD,
};
pub use config::{
    effective_check_interval, load_config, parse_config, save_config, ConfigError, EngineConfig,
    MAX_CHECK_INTERVAL, MIN_CHECK_INTERVAL,
};
pub use device::{
    CommandGate, DeviceChannel, DeviceError, DeviceResult, Frame, FrameSource, TemplateMatcher,
};
pub use engine::{
    CycleReport, EngineContext, EngineError, Monitor, MonitorEvent, TaskOutcome, TriggerEngine,
    CYCLE_BACKOFF,
};
pub use interpreter::{ExecutionReport, Interpreter};
pub use player::{PlaybackError, PlaybackHandle, PlaybackOptions, Player, RandomizationSettings};
pub use recorder::{Recorder, RecorderConfig, RecorderEvent, RecorderState, TouchEvent};
pub use recording::{normalize_legacy, parse_recording, RecordedAction, RecordedKind};
pub use storage::{
    get_app_data_dir, load_recording_file, load_scheme_file, save_recording_file, RecordingLibrary,
    RecordingSource, Storage, StorageError, StorageResult,
};
pub use task::{IfPair, RandomSequence, Scheme, Task, TaskMode, DEFAULT_CHECK_INTERVAL};
pub use template::{decode_base64_image, encode_png_base64, TemplateError, TemplateLibrary};
pub use trajectory::{SwipePlan, SwipeSegment, TrajectoryPoint};
pub use variables::{
    CalcOp, SharedVariables, VariableError, VariableOp, VariableStore, VariableUpdate,
    VariableValue,
};
