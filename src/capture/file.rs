//! Looping playback of a recording

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, instrument};

use super::frame::PixelBuffer;
use super::source::{Capture, FrameSource};
use crate::error::{Error, Result};
use crate::record::avi::AviReader;
use crate::record::mux;
use crate::FileLoopConfig;

pub struct FileLoopSource {
    name: String,
    path: PathBuf,
    options: FileLoopConfig,
    reader: Option<AviReader>,
    last_read: Option<Instant>,
}

impl FileLoopSource {
    #[instrument(skip(options))]
    pub fn open(path: &Path, options: &FileLoopConfig) -> Result<Self> {
        let reader = AviReader::open(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            path: path.to_path_buf(),
            options: options.clone(),
            reader: Some(reader),
            last_read: None,
        })
    }

    /// Sleep until one frame period has passed since the last read
    fn pace(&mut self, fps: f64) {
        if self.options.pace && fps > 0.0 {
            if let Some(last) = self.last_read {
                let period = Duration::from_secs_f64(1.0 / fps);
                if let Some(rest) = period.checked_sub(last.elapsed()) {
                    thread::sleep(rest);
                }
            }
        }
        self.last_read = Some(Instant::now());
    }

    fn to_pixels(&self, data: bytes::Bytes, width: u32, height: u32) -> Result<PixelBuffer> {
        if self.options.split_planes && width % 3 == 0 {
            mux::demultiplex(&data, width, height)
        } else {
            PixelBuffer::gray8(height, width, data)
        }
    }
}

impl FrameSource for FileLoopSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Capture> {
        let header = match &self.reader {
            Some(reader) => *reader.header(),
            None => return Err(Error::read_failure(&self.name, "file not open")),
        };
        self.pace(header.fps);

        let data = self
            .reader
            .as_mut()
            .and_then(AviReader::next_frame)
            .ok_or_else(|| Error::EndOfStream(self.path.clone()))?;

        let captured_at = if self.options.embedded_time {
            mux::decode_timestamp(&data)
        } else {
            None
        };
        let pixels = self.to_pixels(data, header.width, header.height)?;
        Ok(Capture {
            pixels,
            captured_at,
        })
    }

    fn reopen(&mut self) -> Result<()> {
        debug!(path = ?self.path, "restarting playback");
        self.reader = None;
        self.reader = Some(AviReader::open(&self.path)?);
        Ok(())
    }

    fn nominal_fps(&self) -> f64 {
        self.reader.as_ref().map_or(0.0, |r| r.header().fps)
    }

    fn release(&mut self) {
        self.reader = None;
    }
}
