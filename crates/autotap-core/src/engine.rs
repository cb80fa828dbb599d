//! Trigger engine: poll loop over tasks, cooldowns and dispatch.

use crossbeam_channel::{bounded, Receiver, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::action::Action;
use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::condition::ConditionEvaluator;
use crate::config::effective_check_interval;
use crate::device::{Frame, FrameSource, TemplateMatcher};
use crate::interpreter::Interpreter;
use crate::task::{Scheme, Task, TaskMode};
use crate::template::TemplateLibrary;
use crate::variables::SharedVariables;

/// Pause after a poll cycle fails as a whole.
pub const CYCLE_BACKOFF: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no tasks configured")]
    NoTasks,
    #[error("engine is already running")]
    AlreadyRunning,
    #[error("tasks cannot be edited while the engine is running")]
    Running,
    #[error("task not found: {0}")]
    TaskNotFound(String),
}

/// Events emitted by the poll loop.
#[derive(Debug, Clone, Serialize)]
pub enum MonitorEvent {
    Started {
        tasks: usize,
    },
    /// A task branch fired. `branch` is 0 for LEGACY, the pair index for IF
    /// and the chosen sequence index for RANDOM.
    TaskTriggered {
        task_id: String,
        task_name: String,
        branch: usize,
        fired_at: OffsetDateTime,
    },
    TaskFailed {
        task_id: String,
        message: String,
    },
    CycleFailed {
        message: String,
    },
    Stopped,
}

/// Collaborators shared by every poll cycle.
#[derive(Clone)]
pub struct EngineContext {
    pub interpreter: Arc<Interpreter>,
    /// Frame source for image conditions. Without one, image conditions are false.
    pub frames: Option<Arc<dyn FrameSource>>,
    pub matcher: Arc<dyn TemplateMatcher>,
    pub clock: Arc<dyn Clock>,
}

/// What happened to one task in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Disabled,
    CoolingDown,
    NotTriggered,
    Fired { branches: Vec<usize> },
    Failed,
}

/// Per-task outcomes of one cycle, in task order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub outcomes: Vec<(String, TaskOutcome)>,
    pub cancelled: bool,
}

impl CycleReport {
    pub fn fired(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.outcomes.iter().filter_map(|(id, outcome)| match outcome {
            TaskOutcome::Fired { branches } => Some((id.as_str(), branches.as_slice())),
            _ => None,
        })
    }
}

/// Owns the tasks while a session runs.
pub struct Monitor {
    ctx: EngineContext,
    tasks: Vec<Task>,
    templates: Arc<TemplateLibrary>,
    rng: StdRng,
    events: Sender<MonitorEvent>,
}

impl Monitor {
    pub fn new(
        ctx: EngineContext,
        tasks: Vec<Task>,
        templates: Arc<TemplateLibrary>,
        rng: StdRng,
        events: Sender<MonitorEvent>,
    ) -> Self {
        Self {
            ctx,
            tasks,
            templates,
            rng,
            events,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }

    fn emit(&self, event: MonitorEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("Failed to emit event: {}", e);
        }
    }

    /// Capture at most one frame, and only when an enabled task needs it.
    fn capture_frame(&self) -> Option<Frame> {
        let needed = self.tasks.iter().any(|t| t.enabled && t.needs_frame());
        if !needed {
            return None;
        }
        let source = self.ctx.frames.as_ref()?;
        match source.capture() {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "frame capture failed, image conditions are false this cycle");
                None
            }
        }
    }

    /// Run one pass over every task.
    ///
    /// A panic inside one task is caught, reported and does not stop the
    /// remaining tasks.
    pub fn poll_cycle(&mut self, variables: &SharedVariables, cancel: &CancelToken) -> CycleReport {
        let mut report = CycleReport::default();
        let frame = self.capture_frame();

        for index in 0..self.tasks.len() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.run_task(index, frame.as_ref(), variables, cancel)
            }));
            let task = &self.tasks[index];
            let outcome = outcome.unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(task = %task.name, %message, "task failed");
                self.emit(MonitorEvent::TaskFailed {
                    task_id: task.id.clone(),
                    message,
                });
                TaskOutcome::Failed
            });
            report.outcomes.push((self.tasks[index].id.clone(), outcome));
        }

        report
    }

    fn run_task(
        &mut self,
        index: usize,
        frame: Option<&Frame>,
        variables: &SharedVariables,
        cancel: &CancelToken,
    ) -> TaskOutcome {
        let task = &self.tasks[index];
        if !task.enabled {
            return TaskOutcome::Disabled;
        }
        let now = self.ctx.clock.now();
        if task.in_cooldown(now) {
            return TaskOutcome::CoolingDown;
        }

        let selected = select_branches(
            task,
            frame,
            variables,
            &self.templates,
            self.ctx.matcher.as_ref(),
            &mut self.rng,
        );
        if selected.is_empty() {
            return TaskOutcome::NotTriggered;
        }

        info!(task = %task.name, mode = task.mode_name(), branches = ?selected, "task triggered");
        let task_id = task.id.clone();
        let task_name = task.name.clone();
        let interpreter = Arc::clone(&self.ctx.interpreter);
        // Stamped before any action runs so a branch that fails midway
        // still holds the task in cooldown.
        self.tasks[index].last_executed_at = Some(now);

        for &branch in &selected {
            self.emit(MonitorEvent::TaskTriggered {
                task_id: task_id.clone(),
                task_name: task_name.clone(),
                branch,
                fired_at: OffsetDateTime::now_utc(),
            });
            let actions = branch_actions(&self.tasks[index], branch);
            let result = interpreter.execute(actions, variables, cancel);
            debug!(task = %task_name, branch, ?result, "branch finished");
            if result.cancelled {
                break;
            }
        }

        TaskOutcome::Fired { branches: selected }
    }
}

/// Indices of the branches of `task` that fire this cycle.
///
/// Conditions are evaluated against one consistent view of the variables
/// before any branch runs.
fn select_branches(
    task: &Task,
    frame: Option<&Frame>,
    variables: &SharedVariables,
    templates: &TemplateLibrary,
    matcher: &dyn TemplateMatcher,
    rng: &mut StdRng,
) -> Vec<usize> {
    let store = variables.lock();
    let evaluator = ConditionEvaluator::new(&store, frame, templates, matcher);

    match &task.mode {
        TaskMode::Legacy {
            unified_conditions,
            condition_logic,
            ..
        } => {
            if evaluator.evaluate_all(unified_conditions, *condition_logic) {
                vec![0]
            } else {
                vec![]
            }
        }
        TaskMode::If { if_pairs } => if_pairs
            .iter()
            .enumerate()
            .filter(|(_, pair)| evaluator.evaluate_all(&pair.conditions, pair.logic))
            .map(|(i, _)| i)
            .collect(),
        TaskMode::Random {
            unified_conditions,
            condition_logic,
            random_sequences,
        } => {
            if random_sequences.is_empty()
                || !evaluator.evaluate_all(unified_conditions, *condition_logic)
            {
                return vec![];
            }
            vec![rng.random_range(0..random_sequences.len())]
        }
    }
}

fn branch_actions(task: &Task, branch: usize) -> &[Action] {
    match &task.mode {
        TaskMode::Legacy { actions, .. } => actions,
        TaskMode::If { if_pairs } => if_pairs.get(branch).map_or(&[], |p| p.actions.as_slice()),
        TaskMode::Random { random_sequences, .. } => {
            random_sequences.get(branch).map_or(&[], |s| s.actions.as_slice())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_loop(
    mut monitor: Monitor,
    variables: SharedVariables,
    cancel: CancelToken,
    interval: Duration,
) -> Monitor {
    info!(tasks = monitor.tasks.len(), ?interval, "Monitor thread started");
    monitor.emit(MonitorEvent::Started {
        tasks: monitor.tasks.len(),
    });

    while !cancel.is_cancelled() {
        let cycle =
            panic::catch_unwind(AssertUnwindSafe(|| monitor.poll_cycle(&variables, &cancel)));
        let pause = match cycle {
            Ok(report) => {
                debug!(fired = report.fired().count(), "poll cycle finished");
                interval
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(%message, "poll cycle failed, backing off");
                monitor.emit(MonitorEvent::CycleFailed { message });
                CYCLE_BACKOFF
            }
        };
        if !cancel.sleep(pause) {
            break;
        }
    }

    monitor.emit(MonitorEvent::Stopped);
    info!("Monitor thread exiting");
    monitor
}

struct Session {
    cancel: CancelToken,
    thread: JoinHandle<Monitor>,
    /// Tasks as they were at start, restored if the worker cannot hand them back.
    fallback: Vec<Task>,
}

/// Runs a task set on a dedicated poll thread.
///
/// Tasks are owned by the poll thread while running and handed back on
/// [`TriggerEngine::stop`], runtime cooldown state included.
pub struct TriggerEngine {
    ctx: EngineContext,
    tasks: Vec<Task>,
    templates: Arc<TemplateLibrary>,
    check_interval: Duration,
    seed: Option<u64>,
    variables: SharedVariables,
    event_tx: Sender<MonitorEvent>,
    event_rx: Receiver<MonitorEvent>,
    session: Option<Session>,
}

impl TriggerEngine {
    pub fn new(ctx: EngineContext, scheme: Scheme) -> Self {
        let (event_tx, event_rx) = bounded(EVENT_CAPACITY);
        Self {
            ctx,
            tasks: scheme.tasks,
            templates: Arc::new(scheme.templates),
            check_interval: effective_check_interval(scheme.check_interval),
            seed: None,
            variables: SharedVariables::new(),
            event_tx,
            event_rx,
            session: None,
        }
    }

    /// Fix the random source used for RANDOM tasks.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Override the scheme's poll interval, in seconds.
    pub fn with_check_interval(mut self, secs: f64) -> Self {
        self.check_interval = effective_check_interval(secs);
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Handle to the session variables, for external sync.
    pub fn variables(&self) -> SharedVariables {
        self.variables.clone()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Tasks as of the last stop. Cooldown state is current only while stopped.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    fn ensure_stopped(&self) -> Result<(), EngineError> {
        if self.is_running() {
            return Err(EngineError::Running);
        }
        Ok(())
    }

    pub fn add_task(&mut self, task: Task) -> Result<(), EngineError> {
        self.ensure_stopped()?;
        self.tasks.push(task);
        Ok(())
    }

    /// Replace the task with the same id, keeping its cooldown state.
    pub fn replace_task(&mut self, mut task: Task) -> Result<(), EngineError> {
        self.ensure_stopped()?;
        let slot = self
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| EngineError::TaskNotFound(task.id.clone()))?;
        task.last_executed_at = slot.last_executed_at;
        *slot = task;
        Ok(())
    }

    pub fn remove_task(&mut self, id: &str) -> Result<Task, EngineError> {
        self.ensure_stopped()?;
        let index = self
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))?;
        Ok(self.tasks.remove(index))
    }

    pub fn set_templates(&mut self, templates: TemplateLibrary) -> Result<(), EngineError> {
        self.ensure_stopped()?;
        self.templates = Arc::new(templates);
        Ok(())
    }

    /// Start the poll thread.
    ///
    /// Fails without side effects when there are no tasks or a session is
    /// already running.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }
        if self.tasks.is_empty() {
            return Err(EngineError::NoTasks);
        }
        if self.ctx.frames.is_none() && self.tasks.iter().any(Task::needs_frame) {
            warn!("no frame source configured, image conditions will be false");
        }

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let tasks = std::mem::take(&mut self.tasks);
        let fallback = tasks.clone();
        let monitor = Monitor::new(
            self.ctx.clone(),
            tasks,
            Arc::clone(&self.templates),
            rng,
            self.event_tx.clone(),
        );

        let cancel = CancelToken::new();
        let variables = self.variables.clone();
        let interval = self.check_interval;
        let token = cancel.clone();
        let thread = thread::spawn(move || run_loop(monitor, variables, token, interval));

        info!(tasks = fallback.len(), ?interval, "trigger engine started");
        self.session = Some(Session {
            cancel,
            thread,
            fallback,
        });
        Ok(())
    }

    /// Stop the poll thread, cancel in-flight playback and clear the session
    /// variables. Returns false if the engine was not running.
    pub fn stop(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        info!("stopping trigger engine");
        session.cancel.cancel();
        self.ctx.interpreter.player().stop();

        self.tasks = match session.thread.join() {
            Ok(monitor) => monitor.into_tasks(),
            Err(_) => {
                error!("monitor thread panicked, restoring tasks from start");
                session.fallback
            }
        };
        self.variables.clear();
        info!("trigger engine stopped, variables cleared");
        true
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Option<MonitorEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Event stream receiver, for blocking consumers.
    pub fn events(&self) -> Receiver<MonitorEvent> {
        self.event_rx.clone()
    }
}

impl Drop for TriggerEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
