//! V4L2 camera source with memory-mapped streaming

use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture as _;
use v4l::{Device, FourCC};

use super::decoder;
use super::format::{DeviceFormat, FormatTable, Fourcc};
use super::frame::{PixelBuffer, PixelFormat};
use super::source::{Capture, FrameSource};
use crate::error::{Error, Result};

/// Mode the driver actually accepted
#[derive(Debug, Clone, Copy)]
struct ActiveMode {
    format: PixelFormat,
    width: u32,
    height: u32,
    fps: f64,
}

/// A payload that does not decode is a failed read; the next one may be fine
fn decode_payload(path: &str, payload: &[u8], mode: ActiveMode) -> Result<PixelBuffer> {
    decoder::decode_frame(payload, mode.format, mode.width, mode.height)
        .map_err(|e| Error::read_failure(path, e))
}

/// Live camera read through V4L2
pub struct V4l2Source {
    name: String,
    path: String,
    buffer_count: u32,
    requested: Option<DeviceFormat>,
    device: Option<Device>,
    stream: Option<MmapStream<'static>>,
    mode: Option<ActiveMode>,
}

impl V4l2Source {
    #[instrument(skip(name))]
    pub fn open(name: &str, path: &str, buffer_count: u32) -> Result<Self> {
        let mut source = Self {
            name: name.to_string(),
            path: path.to_string(),
            buffer_count,
            requested: None,
            device: None,
            stream: None,
            mode: None,
        };
        source.connect()?;
        Ok(source)
    }

    fn connect(&mut self) -> Result<()> {
        let device = Device::with_path(&self.path)?;

        let caps = device.query_caps()?;
        debug!("Device: {} ({})", caps.card, caps.driver);
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(Error::Device(format!(
                "{} doesn't support video capture",
                self.path
            )));
        }

        if let Some(requested) = &self.requested {
            let mut fmt = device.format()?;
            fmt.width = requested.width;
            fmt.height = requested.height;
            fmt.fourcc = FourCC::new(&requested.fourcc.0);
            device.set_format(&fmt)?;
            device.set_params(&Parameters::with_fps(requested.fps))?;
        }

        let fmt = device.format()?;
        let format = PixelFormat::from_fourcc(&fmt.fourcc.repr).ok_or_else(|| {
            Error::UnsupportedPixelType(format!("device fourcc {}", fmt.fourcc))
        })?;
        let fps = device
            .params()
            .ok()
            .and_then(|p| {
                let interval = p.interval;
                (interval.numerator > 0)
                    .then(|| interval.denominator as f64 / interval.numerator as f64)
            })
            .unwrap_or(0.0);

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, self.buffer_count)?;
        info!(
            "{} streaming {}x{} {:?} at {} fps with {} buffers",
            self.path, fmt.width, fmt.height, format, fps, self.buffer_count
        );

        self.mode = Some(ActiveMode {
            format,
            width: fmt.width,
            height: fmt.height,
            fps,
        });
        self.stream = Some(stream);
        self.device = Some(device);
        Ok(())
    }

    fn disconnect(&mut self) {
        // Buffers are unmapped before the device handle closes
        self.stream = None;
        self.device = None;
        self.mode = None;
    }
}

impl FrameSource for V4l2Source {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<Capture> {
        let (Some(stream), Some(mode)) = (self.stream.as_mut(), self.mode) else {
            return Err(Error::read_failure(&self.path, "stream not started"));
        };

        let (buf, meta) = stream
            .next()
            .map_err(|e| Error::read_failure(&self.path, e))?;
        let used = meta.bytesused as usize;
        let payload = if used > 0 && used <= buf.len() {
            &buf[..used]
        } else {
            buf
        };

        Ok(Capture {
            pixels: decode_payload(&self.path, payload, mode)?,
            captured_at: None,
        })
    }

    fn reopen(&mut self) -> Result<()> {
        self.disconnect();
        self.connect()
    }

    fn apply_format(&mut self, format: &DeviceFormat) -> Result<()> {
        self.requested = Some(*format);
        self.disconnect();
        self.connect()
    }

    fn nominal_fps(&self) -> f64 {
        match (&self.requested, &self.mode) {
            (Some(requested), _) => requested.fps as f64,
            (None, Some(mode)) => mode.fps,
            (None, None) => 0.0,
        }
    }

    fn release(&mut self) {
        self.disconnect();
    }
}

/// Every decodable (fourcc, size, rate) combination the device reports
#[instrument]
pub fn enumerate_formats(path: &str) -> Result<FormatTable> {
    let device = Device::with_path(path)?;
    let mut formats = Vec::new();

    for desc in device.enum_formats()? {
        if PixelFormat::from_fourcc(&desc.fourcc.repr).is_none() {
            debug!("skipping undecodable format {}", desc.fourcc);
            continue;
        }

        let sizes = match device.enum_framesizes(desc.fourcc) {
            Ok(sizes) => sizes,
            Err(e) => {
                warn!("cannot list sizes for {}: {}", desc.fourcc, e);
                continue;
            }
        };

        for size in sizes {
            let (width, height) = match size.size {
                FrameSizeEnum::Discrete(d) => (d.width, d.height),
                FrameSizeEnum::Stepwise(s) => (s.max_width, s.max_height),
            };

            let intervals = device
                .enum_frameintervals(desc.fourcc, width, height)
                .unwrap_or_default();
            for interval in intervals {
                let rates = match interval.interval {
                    FrameIntervalEnum::Discrete(f) => vec![f],
                    FrameIntervalEnum::Stepwise(s) => vec![s.min, s.max],
                };
                for rate in rates {
                    if rate.numerator == 0 {
                        continue;
                    }
                    let fps = rate.denominator / rate.numerator;
                    formats.push(DeviceFormat::new(Fourcc(desc.fourcc.repr), width, height, fps));
                }
            }
        }
    }

    Ok(FormatTable::new(formats))
}
