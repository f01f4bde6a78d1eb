pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod ui;
pub mod utils;

use std::path::{Path, PathBuf};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::{DeviceKind, DeviceSource, Frame};
pub use error::{Error, Result};
pub use pipeline::Pipeline;
pub use record::Recorder;
pub use ui::{ActionSpec, UiSink};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub record: RecordConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// V4L2 mmap buffers
    pub buffer_count: u32,
    /// FPS tracker window of device sources
    pub fps_window: usize,
    pub pin_core: Option<usize>,
    /// Pause after a failed reopen
    pub reopen_backoff_ms: u64,
    pub file: FileLoopConfig,
}

/// Playback options of the file-loop source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoopConfig {
    /// Take capture times from the stamp embedded in each frame
    pub embedded_time: bool,
    /// Rebuild 3-channel images from the stored channel planes
    pub split_planes: bool,
    /// Sleep to the rate stored in the file
    pub pace: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    pub output_dir: PathBuf,
    /// Four-character code written into the stream headers
    pub codec: String,
    pub extension: String,
    pub fps_window: usize,
    /// Initial file name suffix
    pub suffix: Option<String>,
    pub pin_core: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub fps_window: usize,
    /// Evenly spaced columns sampled by the texture metric
    pub variance_columns: usize,
    /// Frames averaged by the texture metric
    pub variance_window: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of both the display and the record queue
    pub queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_count: 4,
            fps_window: 20,
            pin_core: None,
            reopen_backoff_ms: 100,
            file: FileLoopConfig::default(),
        }
    }
}

impl Default for FileLoopConfig {
    fn default() -> Self {
        Self {
            embedded_time: false,
            split_planes: true,
            pace: true,
        }
    }
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            codec: "Y800".into(),
            extension: "avi".into(),
            fps_window: 50,
            suffix: None,
            pin_core: None,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            fps_window: 50,
            variance_columns: 20,
            variance_window: 50,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { queue_capacity: 5 }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `TREC_*` environment
    /// variables (`TREC_RECORD__OUTPUT_DIR=/data`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("TREC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.pipeline.queue_capacity, 5);
        assert_eq!(config.capture.fps_window, 20);
        assert_eq!(config.record.fps_window, 50);
        assert_eq!(config.display.variance_columns, 20);
        assert_eq!(config.record.output_dir, PathBuf::from("recordings"));
        assert_eq!(config.record.codec, "Y800");
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trec.toml");
        std::fs::write(
            &path,
            "[record]\noutput_dir = \"/data/runs\"\nsuffix = \"bench\"\n\n[capture.file]\nembedded_time = true\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.record.output_dir, PathBuf::from("/data/runs"));
        assert_eq!(config.record.suffix.as_deref(), Some("bench"));
        assert!(config.capture.file.embedded_time);
        assert!(config.capture.file.split_planes);
        assert_eq!(config.record.codec, "Y800");
    }

    #[test]
    fn missing_file_is_an_error() {
        let missing = Path::new("/nonexistent/trec.toml");
        assert!(matches!(Config::load(Some(missing)), Err(Error::Config(_))));
    }
}
