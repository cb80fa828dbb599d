//! Common error types for autotap-platform.

use autotap_core::DeviceError;
use thiserror::Error;

/// Platform-level errors.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("failed to launch adb: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("no device connected")]
    NoDevice,
    #[error("screencap returned invalid data: {0}")]
    InvalidCapture(String),
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Result type for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

impl From<PlatformError> for DeviceError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::NoDevice => DeviceError::NotConnected,
            PlatformError::InvalidCapture(_) | PlatformError::Image(_) => {
                DeviceError::CaptureFailed(err.to_string())
            }
            other => DeviceError::CommandFailed(other.to_string()),
        }
    }
}
