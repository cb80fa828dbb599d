//! Logging channel that never touches a device.

use autotap_core::{DeviceChannel, DeviceResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// Logs every command instead of sending it. Useful for trying out schemes.
#[derive(Debug, Default)]
pub struct DryRunChannel {
    sent: AtomicUsize,
}

impl DryRunChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands seen so far.
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }

    fn log(&self, command: &str) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        info!(command, "dry run: would send");
    }
}

impl DeviceChannel for DryRunChannel {
    fn tap(&self, x: i32, y: i32) -> DeviceResult<()> {
        self.log(&format!("input tap {x} {y}"));
        Ok(())
    }

    fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u64) -> DeviceResult<()> {
        self.log(&format!("input swipe {x1} {y1} {x2} {y2} {duration_ms}"));
        Ok(())
    }

    fn text(&self, text: &str) -> DeviceResult<()> {
        self.log(&format!("input text {text:?}"));
        Ok(())
    }

    fn keyevent(&self, code: i32) -> DeviceResult<()> {
        self.log(&format!("input keyevent {code}"));
        Ok(())
    }

    fn shell(&self, command: &str) -> DeviceResult<String> {
        self.log(command);
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_commands() {
        let channel = DryRunChannel::new();
        channel.tap(1, 2).unwrap();
        channel.swipe(0, 0, 5, 5, 300).unwrap();
        assert_eq!(channel.shell("ls").unwrap(), "");
        assert_eq!(channel.sent(), 3);
    }
}
