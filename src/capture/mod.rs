pub mod control;
pub mod decoder;
pub mod device;
pub mod file;
pub mod format;
pub mod frame;
pub mod source;
pub mod v4l2;

pub use device::{DeviceKind, DeviceSource};
pub use file::FileLoopSource;
pub use format::{DeviceFormat, FormatTable, Fourcc};
pub use frame::{Frame, PixelBuffer, PixelFormat, RecordItem};
pub use source::{Capture, FrameSource};
pub use v4l2::V4l2Source;
