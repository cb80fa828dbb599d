//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Granularity of cancellation-aware sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Shared stop flag, polled by long-running loops.
///
/// Cancellation never interrupts a device command already in flight; it only
/// prevents the next scheduled step from starting.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in small slices. Returns false if cancelled first.
    ///
    /// A duration past the clock's range sleeps until cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.is_cancelled() {
                return false;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return true;
                    }
                    left.min(SLEEP_SLICE)
                }
                None => SLEEP_SLICE,
            };
            thread::sleep(slice);
        }
    }

    /// Same as [`CancelToken::sleep`], taking seconds. Non-positive values
    /// return at once; values too large for a `Duration` saturate.
    pub fn sleep_secs(&self, secs: f64) -> bool {
        if secs.is_nan() || secs <= 0.0 {
            return !self.is_cancelled();
        }
        self.sleep(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
    }
}
