//! Frame source backed by `adb exec-out screencap -p`.

use autotap_core::{DeviceResult, Frame, FrameSource};
use image::ImageFormat;
use tracing::debug;

use crate::adb::AdbChannel;
use crate::{PlatformError, PlatformResult};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Captures device frames in device pixel coordinates.
#[derive(Debug, Clone)]
pub struct AdbScreencap {
    adb: AdbChannel,
}

impl AdbScreencap {
    pub fn new(adb: AdbChannel) -> Self {
        Self { adb }
    }

    pub fn capture_png(&self) -> PlatformResult<Vec<u8>> {
        let output = self.adb.run(&["exec-out", "screencap", "-p"])?;
        Ok(output.stdout)
    }
}

impl FrameSource for AdbScreencap {
    fn capture(&self) -> DeviceResult<Frame> {
        let png = self.capture_png()?;
        let frame = decode_screencap(&png)?;
        debug!(width = frame.width(), height = frame.height(), "captured frame");
        Ok(frame)
    }
}

/// Decode raw screencap output into an RGBA frame.
pub fn decode_screencap(data: &[u8]) -> PlatformResult<Frame> {
    if !data.starts_with(PNG_MAGIC) {
        return Err(PlatformError::InvalidCapture(format!(
            "expected PNG data, got {} bytes",
            data.len()
        )));
    }
    Ok(image::load_from_memory_with_format(data, ImageFormat::Png)?.to_rgba8())
}
