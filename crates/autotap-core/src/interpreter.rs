//! Action interpreter: runs a task's action list against the device.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionKind};
use crate::cancel::CancelToken;
use crate::device::{DeviceChannel, DeviceError};
use crate::player::{PlaybackError, PlaybackOptions, Player};
use crate::storage::{RecordingSource, StorageError};
use crate::variables::{SharedVariables, VariableError};

/// Outcome of one `execute` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Actions dispatched, failed ones included.
    pub executed: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Why a single action did not take effect. Logged, never propagated.
#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Variable(#[from] VariableError),
    #[error(transparent)]
    Recording(#[from] StorageError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

pub struct Interpreter {
    device: Arc<dyn DeviceChannel>,
    player: Arc<Player>,
    recordings: Arc<dyn RecordingSource>,
}

impl Interpreter {
    pub fn new(
        device: Arc<dyn DeviceChannel>,
        player: Arc<Player>,
        recordings: Arc<dyn RecordingSource>,
    ) -> Self {
        Self {
            device,
            player,
            recordings,
        }
    }

    pub fn player(&self) -> &Arc<Player> {
        &self.player
    }

    /// Run `actions` in order.
    ///
    /// `cancel` is checked before each action and during every sleep; once set,
    /// nothing further runs and nothing already done is rolled back.
    pub fn execute(
        &self,
        actions: &[Action],
        variables: &SharedVariables,
        cancel: &CancelToken,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for (index, action) in actions.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            debug!(index, action = action.kind.label(), "executing action");
            report.executed += 1;
            match self.step(&action.kind, variables, cancel) {
                Ok(true) => {}
                Ok(false) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(index, action = action.kind.label(), error = %e, "action failed");
                }
            }

            if !cancel.sleep_secs(action.delay_after) {
                report.cancelled = true;
                break;
            }
        }

        if report.cancelled {
            info!(executed = report.executed, "action list cancelled");
        }
        report
    }

    /// Dispatch one action. `Ok(false)` means it was interrupted by cancellation.
    fn step(
        &self,
        kind: &ActionKind,
        variables: &SharedVariables,
        cancel: &CancelToken,
    ) -> Result<bool, StepError> {
        match kind {
            ActionKind::Click { x, y } => self.device.tap(*x, *y)?,
            ActionKind::LongClick { x, y, duration_ms } => {
                self.device.swipe(*x, *y, *x, *y, *duration_ms)?
            }
            ActionKind::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            } => self.device.swipe(*x1, *y1, *x2, *y2, *duration_ms)?,
            ActionKind::Text { text } => self.device.text(text)?,
            ActionKind::Key { keycode, .. } => self.device.keyevent(*keycode)?,
            ActionKind::Wait { seconds } => return Ok(cancel.sleep_secs(*seconds)),
            ActionKind::PlayRecording {
                recording,
                speed,
                use_random,
            } => {
                let actions = self.recordings.load_recording(recording)?;
                let options = PlaybackOptions {
                    speed: *speed,
                    randomize: *use_random,
                };
                info!(%recording, count = actions.len(), speed, "playing recording");
                return Ok(self.player.play(&actions, options, cancel)?);
            }
            ActionKind::SetVariable(update) => {
                let value = variables.apply(update)?;
                debug!(variable = %update.variable, value, "variable updated");
            }
            ActionKind::ShellCommand { command } => {
                let output = self.device.shell(command)?;
                debug!(%command, output = %output.trim(), "shell command finished");
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{Command, RecordingChannel};
    use crate::player::RandomizationSettings;
    use crate::recording::{RecordedAction, RecordedKind};
    use crate::storage::StorageResult;
    use crate::variables::{VariableOp, VariableUpdate, VariableValue};
    use std::collections::HashMap;
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct MemoryRecordings(HashMap<String, Vec<RecordedAction>>);

    impl RecordingSource for MemoryRecordings {
        fn load_recording(&self, reference: &str) -> StorageResult<Vec<RecordedAction>> {
            self.0
                .get(reference)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(reference.to_string()))
        }
    }

    fn interpreter_with(
        channel: &Arc<RecordingChannel>,
        recordings: MemoryRecordings,
    ) -> Interpreter {
        let settings = RandomizationSettings::default();
        let player = Arc::new(Player::with_seed(channel.clone(), settings, 3));
        Interpreter::new(channel.clone(), player, Arc::new(recordings))
    }

    fn action(kind: ActionKind) -> Action {
        Action::new(kind).with_delay(0.0)
    }

    fn play(recording: &str, speed: f64) -> Action {
        action(ActionKind::PlayRecording {
            recording: recording.into(),
            speed,
            use_random: false,
        })
    }

    fn outcome(executed: usize, failed: usize, cancelled: bool) -> ExecutionReport {
        ExecutionReport {
            executed,
            failed,
            cancelled,
        }
    }

    fn set_var(variable: &str, op: VariableOp) -> Action {
        action(ActionKind::SetVariable(VariableUpdate {
            variable: variable.into(),
            op,
        }))
    }

    #[test]
    fn test_dispatches_device_actions() {
        let channel = Arc::new(RecordingChannel::default());
        let interpreter = interpreter_with(&channel, MemoryRecordings::default());
        let actions = vec![
            action(ActionKind::Click { x: 1, y: 2 }),
            action(ActionKind::LongClick {
                x: 3,
                y: 4,
                duration_ms: 900,
            }),
            action(ActionKind::Swipe {
                x1: 0,
                y1: 0,
                x2: 10,
                y2: 20,
                duration_ms: 300,
            }),
            action(ActionKind::Text { text: "gg".into() }),
            action(ActionKind::Key {
                keycode: 66,
                key_name: Some("ENTER".into()),
            }),
            action(ActionKind::ShellCommand {
                command: "input keyevent 3".into(),
            }),
        ];

        let report = interpreter.execute(&actions, &SharedVariables::new(), &CancelToken::new());
        assert_eq!(report, outcome(6, 0, false));
        assert_eq!(
            channel.commands(),
            vec![
                Command::Tap(1, 2),
                Command::Swipe(3, 4, 3, 4, 900),
                Command::Swipe(0, 0, 10, 20, 300),
                Command::Text("gg".into()),
                Command::Key(66),
                Command::Shell("input keyevent 3".into()),
            ]
        );
    }

    #[test]
    fn test_failures_are_counted_and_skipped() {
        let channel = Arc::new(RecordingChannel::failing_taps());
        let interpreter = interpreter_with(&channel, MemoryRecordings::default());
        let variables = SharedVariables::new();
        variables.set("gold", 10);

        let actions = vec![
            action(ActionKind::Click { x: 0, y: 0 }),
            set_var("gold", VariableOp::Divide { value: 0 }),
            set_var("gold", VariableOp::FromVariable {
                source_name: "missing".into(),
                calc_op: crate::variables::CalcOp::Add,
                operand: 1,
            }),
            play("nope", 1.0),
            set_var("gold", VariableOp::Add { value: 5 }),
        ];

        let report = interpreter.execute(&actions, &variables, &CancelToken::new());
        assert_eq!(report, outcome(5, 4, false));
        assert_eq!(variables.get("gold"), Some(VariableValue::Int(15)));
    }

    #[test]
    fn test_play_recording_uses_player() {
        let channel = Arc::new(RecordingChannel::default());
        let mut recordings = MemoryRecordings::default();
        recordings.0.insert(
            "route".into(),
            vec![
                RecordedAction::instant(RecordedKind::Click { x: 7, y: 7 }, 100),
                RecordedAction::instant(RecordedKind::Key { keycode: 4, key_name: None }, 120),
            ],
        );
        let interpreter = interpreter_with(&channel, recordings);
        let actions = vec![play("route", 2.0), action(ActionKind::Click { x: 9, y: 9 })];

        let report = interpreter.execute(&actions, &SharedVariables::new(), &CancelToken::new());
        assert_eq!(report.failed, 0);
        assert_eq!(
            channel.commands(),
            vec![Command::Tap(7, 7), Command::Key(4), Command::Tap(9, 9)]
        );
    }

    #[test]
    fn test_play_recording_while_playing_is_skipped() {
        let channel = Arc::new(RecordingChannel::default());
        let mut recordings = MemoryRecordings::default();
        let route = vec![RecordedAction::instant(RecordedKind::Click { x: 7, y: 7 }, 0)];
        recordings.0.insert("route".into(), route);
        let interpreter = interpreter_with(&channel, recordings);

        let long = vec![
            RecordedAction::instant(RecordedKind::Key { keycode: 3, key_name: None }, 0),
            RecordedAction::instant(RecordedKind::Key { keycode: 4, key_name: None }, 60_000),
        ];
        let running = interpreter.player().spawn(long, PlaybackOptions::default()).unwrap();

        let actions = vec![play("route", 1.0), action(ActionKind::Click { x: 9, y: 9 })];
        let report = interpreter.execute(&actions, &SharedVariables::new(), &CancelToken::new());
        running.cancel();
        assert!(!running.join());

        assert_eq!(report, outcome(2, 1, false));
        let commands = channel.commands();
        assert!(commands.contains(&Command::Tap(9, 9)));
        assert!(!commands.contains(&Command::Tap(7, 7)));
    }

    #[test]
    fn test_oversized_waits_sleep_until_cancelled() {
        let channel = Arc::new(RecordingChannel::default());
        let interpreter = Arc::new(interpreter_with(&channel, MemoryRecordings::default()));
        let cancel = CancelToken::new();
        let actions = vec![
            Action::new(ActionKind::Click { x: 1, y: 1 }).with_delay(1e20),
            action(ActionKind::Wait { seconds: f64::MAX }),
        ];

        let worker = {
            let interpreter = interpreter.clone();
            let cancel = cancel.clone();
            thread::spawn(move || interpreter.execute(&actions, &SharedVariables::new(), &cancel))
        };
        thread::sleep(Duration::from_millis(100));
        cancel.cancel();
        let report = worker.join().unwrap();

        assert!(report.cancelled);
        assert_eq!(report.executed, 1);
        assert_eq!(channel.commands(), vec![Command::Tap(1, 1)]);
    }

    #[test]
    fn test_cancel_before_start_runs_nothing() {
        let channel = Arc::new(RecordingChannel::default());
        let interpreter = interpreter_with(&channel, MemoryRecordings::default());
        let cancel = CancelToken::new();
        cancel.cancel();

        let actions = [action(ActionKind::Click { x: 0, y: 0 })];
        let report = interpreter.execute(&actions, &SharedVariables::new(), &cancel);
        assert_eq!(report, outcome(0, 0, true));
        assert!(channel.commands().is_empty());
    }

    #[test]
    fn test_cancel_interrupts_wait() {
        let channel = Arc::new(RecordingChannel::default());
        let interpreter = Arc::new(interpreter_with(&channel, MemoryRecordings::default()));
        let cancel = CancelToken::new();
        let actions = vec![
            action(ActionKind::Click { x: 1, y: 1 }),
            action(ActionKind::Wait { seconds: 10.0 }),
            action(ActionKind::Click { x: 2, y: 2 }),
        ];

        let worker = {
            let interpreter = interpreter.clone();
            let cancel = cancel.clone();
            thread::spawn(move || interpreter.execute(&actions, &SharedVariables::new(), &cancel))
        };
        thread::sleep(Duration::from_millis(100));
        let start = Instant::now();
        cancel.cancel();
        let report = worker.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(report.cancelled);
        assert_eq!(report.executed, 2);
        assert_eq!(channel.commands(), vec![Command::Tap(1, 1)]);
    }

    #[test]
    fn test_delay_after_is_honored() {
        let channel = Arc::new(RecordingChannel::default());
        let interpreter = interpreter_with(&channel, MemoryRecordings::default());
        let actions = vec![
            Action::new(ActionKind::Click { x: 0, y: 0 }).with_delay(0.15),
            Action::new(ActionKind::Click { x: 0, y: 0 }).with_delay(0.15),
        ];

        let start = Instant::now();
        interpreter.execute(&actions, &SharedVariables::new(), &CancelToken::new());
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}
