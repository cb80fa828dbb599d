//! `adb`-backed device command channel.

use autotap_core::{DeviceChannel, DeviceResult};
use std::path::PathBuf;
use std::process::{Command, Output};
use tracing::{debug, warn};

use crate::{PlatformError, PlatformResult};

/// One line of `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedDevice {
    pub serial: String,
    /// `device`, `offline`, `unauthorized`, ...
    pub state: String,
}

impl AttachedDevice {
    pub fn is_ready(&self) -> bool {
        self.state == "device"
    }
}

/// Sends `input` commands through `adb shell`.
///
/// Without a serial, adb targets the only attached device.
#[derive(Debug, Clone)]
pub struct AdbChannel {
    adb_path: PathBuf,
    serial: Option<String>,
}

impl AdbChannel {
    pub fn new(adb_path: impl Into<PathBuf>, serial: Option<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial,
        }
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd
    }

    /// Run adb with `args` against the selected device.
    pub(crate) fn run(&self, args: &[&str]) -> PlatformResult<Output> {
        let output = self.command().args(args).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("no devices") || stderr.contains("not found") {
                return Err(PlatformError::NoDevice);
            }
            return Err(PlatformError::CommandFailed {
                command: args.join(" "),
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(output)
    }

    /// Run a shell command on the device and return its stdout.
    pub fn shell_output(&self, command: &str) -> PlatformResult<String> {
        debug!(serial = ?self.serial, command, "adb shell");
        let output = self.run(&["shell", command])?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// List attached devices.
    pub fn devices(&self) -> PlatformResult<Vec<AttachedDevice>> {
        let output = Command::new(&self.adb_path).arg("devices").output()?;
        Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Check that the target device answers.
    pub fn check_ready(&self) -> bool {
        match self.shell_output("echo ready") {
            Ok(out) => out.trim() == "ready",
            Err(e) => {
                warn!(error = %e, "device not ready");
                false
            }
        }
    }
}

impl DeviceChannel for AdbChannel {
    fn tap(&self, x: i32, y: i32) -> DeviceResult<()> {
        self.shell_output(&format!("input tap {x} {y}"))?;
        Ok(())
    }

    fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u64) -> DeviceResult<()> {
        self.shell_output(&format!("input swipe {x1} {y1} {x2} {y2} {duration_ms}"))?;
        Ok(())
    }

    fn text(&self, text: &str) -> DeviceResult<()> {
        self.shell_output(&format!("input text \"{}\"", escape_text(text)))?;
        Ok(())
    }

    fn keyevent(&self, code: i32) -> DeviceResult<()> {
        self.shell_output(&format!("input keyevent {code}"))?;
        Ok(())
    }

    fn shell(&self, command: &str) -> DeviceResult<String> {
        Ok(self.shell_output(command)?)
    }
}

/// Escape text for `input text "<...>"`: spaces become `%s`, quotes are backslashed.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            ' ' => out.push_str("%s"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out
}

/// Parse `adb devices` output.
pub fn parse_devices(output: &str) -> Vec<AttachedDevice> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some(AttachedDevice {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}
