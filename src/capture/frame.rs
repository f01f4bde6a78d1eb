use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element type of a pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleType {
    U8,
    /// Little-endian 16-bit samples
    U16,
}

impl SampleType {
    pub fn size(self) -> usize {
        match self {
            SampleType::U8 => 1,
            SampleType::U16 => 2,
        }
    }
}

/// Geometry of a pixel buffer. `channels == None` marks a 2D buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub height: u32,
    pub width: u32,
    pub channels: Option<u32>,
}

impl Shape {
    pub fn planar(height: u32, width: u32) -> Self {
        Self {
            height,
            width,
            channels: None,
        }
    }

    pub fn interleaved(height: u32, width: u32, channels: u32) -> Self {
        Self {
            height,
            width,
            channels: Some(channels),
        }
    }

    pub fn rank(&self) -> usize {
        if self.channels.is_some() {
            3
        } else {
            2
        }
    }

    /// Samples per pixel, 1 for 2D buffers
    pub fn samples_per_pixel(&self) -> usize {
        self.channels.unwrap_or(1) as usize
    }

    pub fn sample_count(&self) -> usize {
        self.height as usize * self.width as usize * self.samples_per_pixel()
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.channels {
            Some(c) => write!(f, "{}x{}x{}", self.height, self.width, c),
            None => write!(f, "{}x{}", self.height, self.width),
        }
    }
}

/// Immutable pixel data, shared between queues without copying
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    data: Bytes,
    shape: Shape,
    sample: SampleType,
}

impl PixelBuffer {
    pub fn new(data: impl Into<Bytes>, shape: Shape, sample: SampleType) -> Result<Self> {
        let data = data.into();
        let expected = shape.sample_count() * sample.size();
        if data.len() != expected {
            return Err(Error::UnsupportedBufferShape(format!(
                "{} {:?} needs {} bytes, got {}",
                shape,
                sample,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data,
            shape,
            sample,
        })
    }

    pub fn gray8(height: u32, width: u32, data: impl Into<Bytes>) -> Result<Self> {
        Self::new(data, Shape::planar(height, width), SampleType::U8)
    }

    pub fn rgb8(height: u32, width: u32, data: impl Into<Bytes>) -> Result<Self> {
        Self::new(data, Shape::interleaved(height, width, 3), SampleType::U8)
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn sample(&self) -> SampleType {
        self.sample
    }

    /// Raw bytes, only for 8-bit buffers
    pub fn as_u8(&self) -> Result<&[u8]> {
        match self.sample {
            SampleType::U8 => Ok(&self.data),
            other => Err(Error::UnsupportedPixelType(format!("{other:?}"))),
        }
    }

    /// Sample at (row, column, channel) widened to u16
    pub fn sample_at(&self, row: u32, col: u32, channel: u32) -> u16 {
        let spp = self.shape.samples_per_pixel();
        let index =
            (row as usize * self.shape.width as usize + col as usize) * spp + channel as usize;
        match self.sample {
            SampleType::U8 => self.data[index] as u16,
            SampleType::U16 => u16::from_le_bytes([self.data[2 * index], self.data[2 * index + 1]]),
        }
    }
}

/// One captured image with its capture time
#[derive(Debug, Clone)]
pub struct Frame {
    /// Epoch seconds at capture
    pub captured_at: f64,
    pub pixels: PixelBuffer,
    /// Frame rate the source was configured for
    pub source_fps: f64,
    pub sequence: u64,
}

/// Payload of the record queue
#[derive(Debug, Clone)]
pub enum RecordItem {
    Frame(Frame),
    /// Ends the current recording session
    Sentinel,
}

/// Pixel formats we can decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
    Grey,
    Y16,
}

impl PixelFormat {
    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"BGR3" => Some(PixelFormat::Bgr24),
            b"YUYV" => Some(PixelFormat::Yuyv4),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"GREY" => Some(PixelFormat::Grey),
            b"Y16 " => Some(PixelFormat::Y16),
            _ => None,
        }
    }

    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Bgr24 => *b"BGR3",
            PixelFormat::Yuyv4 => *b"YUYV",
            PixelFormat::Mjpeg => *b"MJPG",
            PixelFormat::Grey => *b"GREY",
            PixelFormat::Y16 => *b"Y16 ",
        }
    }
}
