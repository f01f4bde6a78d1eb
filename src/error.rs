use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the capture, record and display stages
#[derive(Debug, Error)]
pub enum Error {
    /// The device or file returned no data. Recovered by reopening the source.
    #[error("read failed on {source_name}: {reason}")]
    ReadFailure { source_name: String, reason: String },

    /// A recording reached its last frame
    #[error("end of stream: {0}")]
    EndOfStream(PathBuf),

    #[error("failed to open writer for {path:?}: {reason}")]
    WriterOpenFailure { path: PathBuf, reason: String },

    #[error("unsupported buffer shape {0}")]
    UnsupportedBufferShape(String),

    #[error("unsupported pixel type {0}")]
    UnsupportedPixelType(String),

    #[error("failed to decode {fourcc} payload: {reason}")]
    Decode { fourcc: String, reason: String },

    #[error("invalid container: {0}")]
    InvalidFormat(String),

    #[error("device error: {0}")]
    Device(String),

    /// Element creation, linking or streaming failure in a media pipeline
    #[error("gstreamer: {0}")]
    Gst(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn read_failure(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::ReadFailure {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Contract violations that must end the current session instead of being retried
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedBufferShape(_) | Self::UnsupportedPixelType(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
