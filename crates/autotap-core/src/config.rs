//! Engine settings loaded from YAML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::player::RandomizationSettings;
use crate::storage::get_app_data_dir;
use crate::task::DEFAULT_CHECK_INTERVAL;

pub const MIN_CHECK_INTERVAL: f64 = 0.05;
pub const MAX_CHECK_INTERVAL: f64 = 10.0;
/// Intervals below this work but load the device noticeably.
const FAST_CHECK_INTERVAL: f64 = 0.1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Engine settings. All fields are optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Poll interval in seconds. Overrides the scheme's value when set.
    pub check_interval: Option<f64>,
    /// Perturbation ranges for randomized playback.
    pub playback: RandomizationSettings,
    /// `adb` executable.
    pub adb_path: String,
    /// Target device serial. Without one, adb picks the only attached device.
    pub serial: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_interval: None,
            playback: RandomizationSettings::default(),
            adb_path: "adb".to_string(),
            serial: None,
        }
    }
}

impl EngineConfig {
    pub fn default_path() -> PathBuf {
        get_app_data_dir().join("config.yaml")
    }
}

/// Parse settings from YAML text.
pub fn parse_config(content: &str) -> Result<EngineConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(EngineConfig::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

/// Load settings from `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    if !path.exists() {
        info!(?path, "No config file, using defaults");
        return Ok(EngineConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    info!(?path, "Loaded config");
    Ok(config)
}

pub fn save_config(path: &Path, config: &EngineConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_yaml::to_string(config)?)?;
    Ok(())
}

/// Poll interval actually used for a requested value in seconds.
///
/// Non-finite values fall back to the default; everything else is clamped
/// into `[MIN_CHECK_INTERVAL, MAX_CHECK_INTERVAL]`.
pub fn effective_check_interval(secs: f64) -> Duration {
    let secs = if secs.is_finite() { secs } else { DEFAULT_CHECK_INTERVAL };
    let clamped = secs.clamp(MIN_CHECK_INTERVAL, MAX_CHECK_INTERVAL);
    if clamped != secs {
        warn!(requested = secs, used = clamped, "check interval out of range, clamped");
    }
    if clamped < FAST_CHECK_INTERVAL {
        warn!(interval = clamped, "check interval below 0.1s, expect heavy device load");
    }
    Duration::from_secs_f64(clamped)
}
