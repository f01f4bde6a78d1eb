use super::format::DeviceFormat;
use super::frame::PixelBuffer;
use crate::error::Result;

/// Result of one successful read
#[derive(Debug, Clone)]
pub struct Capture {
    pub pixels: PixelBuffer,
    /// Capture time carried by the source itself, if any
    pub captured_at: Option<f64>,
}

/// Read strategy of a capture worker: a camera, a recording, or a test script
pub trait FrameSource: Send + 'static {
    fn name(&self) -> &str;

    /// Blocking read of the next frame
    fn read(&mut self) -> Result<Capture>;

    /// Close and reopen in place after a failed read
    fn reopen(&mut self) -> Result<()>;

    /// Reconfigure geometry, codec and rate. Only called between sessions.
    fn apply_format(&mut self, _format: &DeviceFormat) -> Result<()> {
        Ok(())
    }

    /// Rate the source is configured for
    fn nominal_fps(&self) -> f64;

    /// Give the underlying handle back. Called once, when the worker exits.
    fn release(&mut self);
}
