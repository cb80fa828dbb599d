//! Collaborator interfaces: device command channel, frame source, template matcher.
//!
//! Implementations live in `autotap-platform`; the core only talks to these traits.

use image::RgbaImage;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// A captured screen frame.
pub type Frame = RgbaImage;

/// Device-level failures. The core logs them and moves on; it never retries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("device not connected")]
    NotConnected,
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Low-level command channel to the controlled device.
pub trait DeviceChannel: Send + Sync {
    fn tap(&self, x: i32, y: i32) -> DeviceResult<()>;

    fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u64) -> DeviceResult<()>;

    fn text(&self, text: &str) -> DeviceResult<()>;

    fn keyevent(&self, code: i32) -> DeviceResult<()>;

    /// Run a raw shell command and return its output.
    fn shell(&self, command: &str) -> DeviceResult<String>;
}

/// Produces frames for image conditions.
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> DeviceResult<Frame>;
}

/// Black-box template matching: does `template` appear inside `region`
/// with a confidence of at least `threshold`?
pub trait TemplateMatcher: Send + Sync {
    fn matches(&self, region: &RgbaImage, template: &RgbaImage, threshold: f64) -> bool;
}

/// Serializes every command through a single gate.
///
/// The poll loop's interpreter and a playback worker share one of these so
/// the underlying device never sees concurrent submissions.
pub struct CommandGate {
    inner: Arc<dyn DeviceChannel>,
    gate: Mutex<()>,
}

impl CommandGate {
    pub fn new(inner: Arc<dyn DeviceChannel>) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }

    fn serialized<T>(&self, name: &str, f: impl FnOnce(&dyn DeviceChannel) -> T) -> T {
        let _guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(command = name, "dispatching device command");
        f(self.inner.as_ref())
    }
}

impl DeviceChannel for CommandGate {
    fn tap(&self, x: i32, y: i32) -> DeviceResult<()> {
        self.serialized("tap", |d| d.tap(x, y))
    }

    fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u64) -> DeviceResult<()> {
        self.serialized("swipe", |d| d.swipe(x1, y1, x2, y2, duration_ms))
    }

    fn text(&self, text: &str) -> DeviceResult<()> {
        self.serialized("text", |d| d.text(text))
    }

    fn keyevent(&self, code: i32) -> DeviceResult<()> {
        self.serialized("keyevent", |d| d.keyevent(code))
    }

    fn shell(&self, command: &str) -> DeviceResult<String> {
        self.serialized("shell", |d| d.shell(command))
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{Command, RecordingChannel};
    use super::*;

    #[test]
    fn test_command_gate_forwards() {
        let inner = Arc::new(RecordingChannel::default());
        let gate = CommandGate::new(inner.clone());

        gate.tap(1, 2).unwrap();
        gate.swipe(1, 2, 3, 4, 300).unwrap();
        gate.keyevent(4).unwrap();

        assert_eq!(
            inner.commands(),
            vec![Command::Tap(1, 2), Command::Swipe(1, 2, 3, 4, 300), Command::Key(4)]
        );
    }
}
