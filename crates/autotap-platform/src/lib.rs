//! autotap-platform: device I/O boundary for autotap.
//!
//! This crate provides:
//! - `adb` command channel (`input tap/swipe/text/keyevent`, raw shell)
//! - a dry-run channel that only logs commands
//! - screen capture through `adb exec-out screencap -p`
//! - grayscale normalized cross-correlation template matching

mod adb;
mod dry_run;
mod error;
mod matcher;
mod screencap;

pub use adb::{escape_text, parse_devices, AdbChannel, AttachedDevice};
pub use dry_run::DryRunChannel;
pub use error::{PlatformError, PlatformResult};
pub use matcher::{CcoeffMatcher, MatchLocation};
pub use screencap::{decode_screencap, AdbScreencap};
