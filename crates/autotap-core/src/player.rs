//! Playback scheduler: replays a recording with its captured timing.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::device::DeviceChannel;
use crate::recording::{RecordedAction, RecordedKind};
use crate::trajectory::{self, SwipePlan};

/// Waits shorter than this are skipped.
const MIN_WAIT_SECS: f64 = 0.01;
/// Lateness beyond this is reported as drift.
const DRIFT_WARN_SECS: f64 = 0.5;
/// Press and swipe durations never go below this after speed scaling.
const MIN_GESTURE_MS: u64 = 50;

/// Perturbation ranges applied when a playback is randomized.
///
/// Each range is a fraction: 0.01 means ±1% of the original value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomizationSettings {
    pub position_range: f64,
    pub long_press_duration_range: f64,
    pub swipe_duration_range: f64,
}

impl Default for RandomizationSettings {
    fn default() -> Self {
        Self {
            position_range: 0.01,
            long_press_duration_range: 0.05,
            swipe_duration_range: 0.10,
        }
    }
}

/// Per-call playback options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackOptions {
    /// Divides every relative delay. 2.0 plays twice as fast.
    pub speed: f64,
    pub randomize: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            randomize: false,
        }
    }
}

/// Caller-visible playback failures. Nothing was played when these are returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlaybackError {
    #[error("a playback is already in progress")]
    AlreadyPlaying,
    #[error("recording is empty")]
    EmptyRecording,
    #[error("invalid playback speed: {0}")]
    InvalidSpeed(f64),
}

/// Replays recordings against a device channel, one at a time.
pub struct Player {
    device: Arc<dyn DeviceChannel>,
    settings: RandomizationSettings,
    rng: Mutex<StdRng>,
    playing: AtomicBool,
    active: Mutex<Option<CancelToken>>,
}

/// Releases the single-flight slot when dropped.
struct ActiveSlot<'a> {
    player: &'a Player,
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        *self.player.active.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.player.playing.store(false, Ordering::SeqCst);
    }
}

impl Player {
    pub fn new(device: Arc<dyn DeviceChannel>, settings: RandomizationSettings) -> Self {
        Self::with_rng(device, settings, StdRng::from_os_rng())
    }

    /// Deterministic perturbation for tests.
    pub fn with_seed(
        device: Arc<dyn DeviceChannel>,
        settings: RandomizationSettings,
        seed: u64,
    ) -> Self {
        Self::with_rng(device, settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        device: Arc<dyn DeviceChannel>,
        settings: RandomizationSettings,
        rng: StdRng,
    ) -> Self {
        Self {
            device,
            settings,
            rng: Mutex::new(rng),
            playing: AtomicBool::new(false),
            active: Mutex::new(None),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Cancel the playback in progress. Returns false if nothing was playing.
    pub fn stop(&self) -> bool {
        match self.active.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(token) => {
                info!("stopping playback");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn claim(
        &self,
        actions: &[RecordedAction],
        options: PlaybackOptions,
        cancel: &CancelToken,
    ) -> Result<(), PlaybackError> {
        if actions.is_empty() {
            return Err(PlaybackError::EmptyRecording);
        }
        if !(options.speed.is_finite() && options.speed > 0.0) {
            return Err(PlaybackError::InvalidSpeed(options.speed));
        }
        if Duration::try_from_secs_f64(timeline_secs(actions, options.speed)).is_err() {
            return Err(PlaybackError::InvalidSpeed(options.speed));
        }
        if self
            .playing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PlaybackError::AlreadyPlaying);
        }
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());
        Ok(())
    }

    /// Play on the calling thread. Returns `Ok(false)` if cancelled midway.
    pub fn play(
        &self,
        actions: &[RecordedAction],
        options: PlaybackOptions,
        cancel: &CancelToken,
    ) -> Result<bool, PlaybackError> {
        self.claim(actions, options, cancel)?;
        let _slot = ActiveSlot { player: self };
        Ok(self.run(actions, options, cancel))
    }

    /// Play on a dedicated worker thread.
    ///
    /// The single-flight check happens before the worker starts, so a second
    /// call while one is active fails here rather than inside the thread.
    pub fn spawn(
        self: &Arc<Self>,
        actions: Vec<RecordedAction>,
        options: PlaybackOptions,
    ) -> Result<PlaybackHandle, PlaybackError> {
        let cancel = CancelToken::new();
        self.claim(&actions, options, &cancel)?;

        let player = Arc::clone(self);
        let token = cancel.clone();
        let thread = thread::spawn(move || {
            let _slot = ActiveSlot { player: player.as_ref() };
            player.run(&actions, options, &token)
        });

        Ok(PlaybackHandle {
            cancel,
            thread: Some(thread),
        })
    }

    fn run(
        &self,
        actions: &[RecordedAction],
        options: PlaybackOptions,
        cancel: &CancelToken,
    ) -> bool {
        info!(
            count = actions.len(),
            speed = options.speed,
            randomize = options.randomize,
            "playback started"
        );

        let base_ms = actions[0].start_time_ms;
        let t0 = Instant::now();

        for (index, action) in actions.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(index, "playback cancelled");
                return false;
            }

            let offset_ms = action.start_time_ms.saturating_sub(base_ms);
            let target = offset_ms as f64 / 1000.0 / options.speed;
            let wait = target - t0.elapsed().as_secs_f64();
            if wait > MIN_WAIT_SECS {
                if !cancel.sleep_secs(wait) {
                    info!(index, "playback cancelled");
                    return false;
                }
            } else if wait < -DRIFT_WARN_SECS && index > 0 {
                warn!(index, behind_secs = -wait, "playback is running late");
            }

            debug!(index, total = actions.len(), action = ?action.kind, "replaying action");
            self.execute(action, options);
        }

        info!("playback finished");
        true
    }

    fn execute(&self, action: &RecordedAction, options: PlaybackOptions) {
        let randomize = options.randomize;
        let result = match &action.kind {
            RecordedKind::Click { x, y } => {
                let (x, y) = self.jitter_point(*x, *y, randomize);
                self.device.tap(x, y)
            }
            RecordedKind::LongClick { x, y } => {
                let (x, y) = self.jitter_point(*x, *y, randomize);
                let duration = self.jitter_duration(
                    action.duration_ms.max(1),
                    self.settings.long_press_duration_range,
                    randomize,
                );
                self.device.swipe(x, y, x, y, scaled_duration(duration, options.speed))
            }
            RecordedKind::Swipe { x1, y1, x2, y2 } => {
                let duration = self.jitter_duration(
                    action.duration_ms.max(1),
                    self.settings.swipe_duration_range,
                    randomize,
                );
                let duration = scaled_duration(duration, options.speed);

                let plan = match &action.trajectory {
                    Some(points) if points.len() >= 2 => {
                        let points: Vec<_> = points
                            .iter()
                            .map(|p| {
                                let (x, y) = self.jitter_point(p.x, p.y, randomize);
                                trajectory::TrajectoryPoint::new(x, y, p.t_ms)
                            })
                            .collect();
                        trajectory::reconstruct(&points, duration)
                    }
                    _ => SwipePlan::default(),
                };

                if plan.is_empty() {
                    let (x1, y1) = self.jitter_point(*x1, *y1, randomize);
                    let (x2, y2) = self.jitter_point(*x2, *y2, randomize);
                    self.device.swipe(x1, y1, x2, y2, duration)
                } else {
                    self.execute_plan(&plan)
                }
            }
            RecordedKind::Text { text } => self.device.text(text),
            RecordedKind::Key { keycode, .. } => self.device.keyevent(*keycode),
        };

        if let Err(e) = result {
            warn!(error = %e, action = ?action.kind, "replayed action failed");
        }
    }

    fn execute_plan(&self, plan: &SwipePlan) -> crate::device::DeviceResult<()> {
        for (i, segment) in plan.segments.iter().enumerate() {
            if i > 0 && !plan.pause.is_zero() {
                thread::sleep(plan.pause);
            }
            self.device.swipe(
                segment.from.0,
                segment.from.1,
                segment.to.0,
                segment.to.1,
                segment.duration_ms,
            )?;
        }
        Ok(())
    }

    fn jitter_point(&self, x: i32, y: i32, randomize: bool) -> (i32, i32) {
        if !randomize {
            return (x, y);
        }
        let range = self.settings.position_range;
        (self.jitter(x as f64, range) as i32, self.jitter(y as f64, range) as i32)
    }

    fn jitter_duration(&self, duration_ms: u64, range: f64, randomize: bool) -> u64 {
        if !randomize {
            return duration_ms;
        }
        self.jitter(duration_ms as f64, range).max(1.0) as u64
    }

    /// `value` moved by a uniform fraction in `[-range, range]` of itself.
    fn jitter(&self, value: f64, range: f64) -> f64 {
        if range <= 0.0 {
            return value;
        }
        let factor = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_range(-range..=range);
        value + value * factor
    }
}

/// Length of the scheduled timeline in seconds at `speed`.
fn timeline_secs(actions: &[RecordedAction], speed: f64) -> f64 {
    let base_ms = actions.first().map_or(0, |a| a.start_time_ms);
    let span_ms = actions
        .iter()
        .map(|a| a.start_time_ms.saturating_sub(base_ms))
        .max()
        .unwrap_or(0);
    span_ms as f64 / 1000.0 / speed
}

fn scaled_duration(duration_ms: u64, speed: f64) -> u64 {
    ((duration_ms as f64 / speed) as u64).max(MIN_GESTURE_MS)
}

/// Handle to a playback running on its own worker.
pub struct PlaybackHandle {
    cancel: CancelToken,
    thread: Option<JoinHandle<bool>>,
}

impl PlaybackHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the worker. False if cancelled or if the worker panicked.
    pub fn join(mut self) -> bool {
        match self.thread.take() {
            Some(handle) => handle.join().unwrap_or(false),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{Command, RecordingChannel};
    use crate::trajectory::TrajectoryPoint;

    fn click_at(x: i32, at_ms: i64) -> RecordedAction {
        RecordedAction::instant(RecordedKind::Click { x, y: 0 }, at_ms)
    }

    fn options(speed: f64, randomize: bool) -> PlaybackOptions {
        PlaybackOptions { speed, randomize }
    }

    fn player(channel: &Arc<RecordingChannel>) -> Player {
        Player::with_seed(channel.clone(), RandomizationSettings::default(), 7)
    }

    fn timed_run(speed: f64) -> Duration {
        let channel = Arc::new(RecordingChannel::default());
        let actions: Vec<_> = (0..4).map(|i| click_at(i, 10_000 + i as i64 * 150)).collect();
        let start = Instant::now();
        let finished = player(&channel)
            .play(&actions, options(speed, false), &CancelToken::new())
            .unwrap();
        assert!(finished);
        assert_eq!(channel.commands().len(), 4);
        start.elapsed()
    }

    #[test]
    fn test_plays_in_order_with_base_offset() {
        let channel = Arc::new(RecordingChannel::default());
        let actions = vec![
            click_at(1, 5_000),
            RecordedAction::instant(RecordedKind::Text { text: "hi".into() }, 5_020),
            RecordedAction::instant(RecordedKind::Key { keycode: 4, key_name: None }, 5_040),
        ];
        let start = Instant::now();
        let cancel = CancelToken::new();
        let played = player(&channel).play(&actions, PlaybackOptions::default(), &cancel);
        assert_eq!(played, Ok(true));
        // The first action's absolute timestamp is not waited for.
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(
            channel.commands(),
            vec![Command::Tap(1, 0), Command::Text("hi".into()), Command::Key(4)]
        );
    }

    #[test]
    fn test_double_speed_takes_half_the_time() {
        let normal = timed_run(1.0);
        let fast = timed_run(2.0);
        assert!(normal >= Duration::from_millis(440), "normal run took {normal:?}");
        assert!(fast >= Duration::from_millis(215), "fast run took {fast:?}");
        assert!(fast.as_secs_f64() < normal.as_secs_f64() * 0.75, "{fast:?} vs {normal:?}");
    }

    #[test]
    fn test_rejects_invalid_input() {
        let channel = Arc::new(RecordingChannel::default());
        let player = player(&channel);
        let cancel = CancelToken::new();

        assert_eq!(
            player.play(&[], PlaybackOptions::default(), &cancel),
            Err(PlaybackError::EmptyRecording)
        );
        let zero = options(0.0, false);
        assert_eq!(
            player.play(&[click_at(0, 0)], zero, &cancel),
            Err(PlaybackError::InvalidSpeed(0.0))
        );
        assert!(!player.is_playing());
    }

    #[test]
    fn test_rejects_speed_that_overflows_the_timeline() {
        let channel = Arc::new(RecordingChannel::default());
        let player = player(&channel);
        let crawl = options(1e-300, false);

        let actions = [click_at(0, 0), click_at(1, 1_000)];
        assert_eq!(
            player.play(&actions, crawl, &CancelToken::new()),
            Err(PlaybackError::InvalidSpeed(1e-300))
        );
        assert!(!player.is_playing());
        assert!(channel.commands().is_empty());

        // Extreme timestamps saturate instead of overflowing.
        let wide = [click_at(0, i64::MIN), click_at(1, i64::MAX)];
        let slow = options(1e-10, false);
        assert!(player.play(&wide, slow, &CancelToken::new()).is_err());

        // A single action has nothing to wait for at any positive speed.
        assert_eq!(player.play(&[click_at(2, 0)], crawl, &CancelToken::new()), Ok(true));
        assert_eq!(channel.commands(), vec![Command::Tap(2, 0)]);
    }

    #[test]
    fn test_second_playback_is_rejected() {
        let channel = Arc::new(RecordingChannel::default());
        let player = Arc::new(player(&channel));
        let actions = vec![click_at(0, 0), click_at(1, 400)];

        let handle = player.spawn(actions.clone(), PlaybackOptions::default()).unwrap();
        assert!(player.is_playing());
        assert_eq!(
            player.play(&actions, PlaybackOptions::default(), &CancelToken::new()),
            Err(PlaybackError::AlreadyPlaying)
        );
        assert!(matches!(
            player.spawn(actions.clone(), PlaybackOptions::default()),
            Err(PlaybackError::AlreadyPlaying)
        ));

        assert!(handle.join());
        assert!(!player.is_playing());
        assert_eq!(channel.commands().len(), 2);
    }

    #[test]
    fn test_cancel_stops_before_next_action() {
        let channel = Arc::new(RecordingChannel::default());
        let player = Arc::new(player(&channel));
        let actions = vec![click_at(0, 0), click_at(1, 5_000)];

        let handle = player.spawn(actions, PlaybackOptions::default()).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(player.stop());
        assert!(!handle.join());
        assert_eq!(channel.commands(), vec![Command::Tap(0, 0)]);
        assert!(!player.stop());
    }

    #[test]
    fn test_swipe_durations_scale_with_speed() {
        let channel = Arc::new(RecordingChannel::default());
        let mut press = RecordedAction::spanning(RecordedKind::LongClick { x: 5, y: 5 }, 0, 800);
        press.duration_ms = 800;
        let kind = RecordedKind::Swipe {
            x1: 0,
            y1: 0,
            x2: 100,
            y2: 0,
        };
        let swipe = RecordedAction::spanning(kind, 0, 60);

        player(&channel).play(&[press, swipe], options(2.0, false), &CancelToken::new()).unwrap();
        assert_eq!(
            channel.commands(),
            vec![Command::Swipe(5, 5, 5, 5, 400), Command::Swipe(0, 0, 100, 0, MIN_GESTURE_MS)]
        );
    }

    #[test]
    fn test_swipe_with_trajectory_is_reconstructed() {
        let channel = Arc::new(RecordingChannel::default());
        let points: Vec<_> = (0..6)
            .map(|i| TrajectoryPoint::new(i * 60, (i % 2) * 80, i as i64 * 50))
            .collect();
        let kind = RecordedKind::Swipe {
            x1: 0,
            y1: 0,
            x2: 300,
            y2: 80,
        };
        let swipe = RecordedAction::spanning(kind, 0, 900).with_trajectory(points);

        player(&channel).play(&[swipe], PlaybackOptions::default(), &CancelToken::new()).unwrap();
        let commands = channel.commands();
        assert_eq!(commands.len(), 9);
        assert!(matches!(commands[0], Command::Swipe(0, 0, _, _, 100)));
        assert!(matches!(commands[8], Command::Swipe(_, _, 300, 80, 100)));
    }

    #[test]
    fn test_randomization_stays_in_range() {
        let channel = Arc::new(RecordingChannel::default());
        let player = player(&channel);
        let actions: Vec<_> = (0..50).map(|_| click_at(1000, 0)).collect();

        player.play(&actions, options(1.0, true), &CancelToken::new()).unwrap();

        for command in channel.commands() {
            match command {
                Command::Tap(x, y) => {
                    assert!((990..=1010).contains(&x), "x={x}");
                    assert_eq!(y, 0);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_failed_command_does_not_abort() {
        let channel = Arc::new(RecordingChannel::failing_taps());
        let actions = vec![click_at(1, 0), click_at(2, 0)];
        let finished = Player::with_seed(channel.clone(), RandomizationSettings::default(), 1)
            .play(&actions, PlaybackOptions::default(), &CancelToken::new())
            .unwrap();
        assert!(finished);
        assert_eq!(channel.commands().len(), 2);
    }
}
