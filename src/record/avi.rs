//! Single-channel AVI recordings through GStreamer.
//!
//! Writing runs `appsrc ! avimux ! filesink` on `GRAY8` caps, which avimux
//! stores as raw `Y800`. Playback runs `filesrc ! avidemux ! appsink`.

use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use crate::capture::format::Fourcc;
use crate::error::{Error, Result};

/// Codes naming 8-bit gray samples, all stored as `Y800`
pub const GRAY_CODECS: [Fourcc; 3] = [Fourcc(*b"Y800"), Fourcc(*b"GREY"), Fourcc(*b"Y8  ")];

/// Wait for the muxer to rewrite its headers after EOS
const EOS_TIMEOUT_SECS: u64 = 5;
/// Longest wait for preroll or for the next demuxed frame
const READ_TIMEOUT_SECS: u64 = 5;

/// Stream parameters of a recording
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AviHeader {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

fn init() -> Result<()> {
    gst::init().map_err(|e| Error::Gst(format!("failed to initialize GStreamer: {e}")))
}

/// Rates keep millihertz precision (`7.5` is stored as 15/2)
fn fps_fraction(fps: f64) -> gst::Fraction {
    if fps.is_finite() && fps > 0.0 {
        gst::Fraction::new((fps * 1000.0).round() as i32, 1000)
    } else {
        gst::Fraction::new(0, 1)
    }
}

fn fraction_to_fps(rate: gst::Fraction) -> f64 {
    if rate.denom() == 0 {
        0.0
    } else {
        f64::from(rate.numer()) / f64::from(rate.denom())
    }
}

/// First error posted on the bus, if any
fn bus_error(pipeline: &gst::Pipeline) -> Option<String> {
    let msg = pipeline
        .bus()
        .and_then(|bus| bus.pop_filtered(&[gst::MessageType::Error]))?;
    match msg.view() {
        gst::MessageView::Error(err) => Some(err.error().to_string()),
        _ => None,
    }
}

/// Streaming writer, one 8-bit frame per call
pub struct AviWriter {
    path: PathBuf,
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    info: gst_video::VideoInfo,
    frame_ns: Option<u64>,
    frames: u32,
    finished: bool,
}

impl AviWriter {
    pub fn create(path: &Path, width: u32, height: u32, fps: f64, codec: Fourcc) -> Result<Self> {
        let open_err = |reason: String| Error::WriterOpenFailure {
            path: path.to_path_buf(),
            reason,
        };
        if !GRAY_CODECS.contains(&codec) {
            return Err(open_err(format!("{codec} is not an 8-bit gray code")));
        }
        if width == 0 || height == 0 {
            return Err(open_err(format!("empty frame size {width}x{height}")));
        }
        init()?;

        let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Gray8, width, height)
            .fps(fps_fraction(fps))
            .build()
            .map_err(|e| open_err(e.to_string()))?;
        let caps = info.to_caps().map_err(|e| open_err(e.to_string()))?;

        let appsrc = gst_app::AppSrc::builder()
            .name("src")
            .caps(&caps)
            .format(gst::Format::Time)
            .build();
        let muxer = gst::ElementFactory::make("avimux")
            .build()
            .map_err(|e| open_err(format!("failed to create avimux: {e}")))?;
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", path.to_string_lossy().to_string())
            .property("async", false)
            .build()
            .map_err(|e| open_err(format!("failed to create filesink: {e}")))?;

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many([appsrc.upcast_ref(), &muxer, &filesink])
            .map_err(|e| open_err(format!("failed to add elements: {e}")))?;
        gst::Element::link_many([appsrc.upcast_ref(), &muxer, &filesink])
            .map_err(|e| open_err(format!("failed to link elements: {e}")))?;

        // filesink opens the file during this state change
        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let reason = bus_error(&pipeline).unwrap_or_else(|| e.to_string());
            let _ = pipeline.set_state(gst::State::Null);
            return Err(open_err(reason));
        }
        debug!("opened {:?} ({}x{} @ {} fps, {})", path, width, height, fps, codec);

        Ok(Self {
            path: path.to_path_buf(),
            pipeline,
            appsrc,
            info,
            frame_ns: (fps > 0.0).then(|| (1e9 / fps).round() as u64),
            frames: 0,
            finished: false,
        })
    }

    pub fn write_frame(&mut self, data: Bytes) -> Result<()> {
        if self.finished {
            return Err(Error::InvalidFormat("write after finish".into()));
        }
        let width = self.info.width() as usize;
        let height = self.info.height() as usize;
        if data.len() != width * height {
            return Err(Error::UnsupportedBufferShape(format!(
                "{} byte frame for a {}x{} stream",
                data.len(),
                width,
                height
            )));
        }

        let stride = self.info.stride()[0] as usize;
        let mut buffer = if stride == width {
            gst::Buffer::from_slice(data)
        } else {
            // Raw video rows start on stride boundaries
            let mut padded = vec![0u8; stride * height];
            for (row, src) in padded.chunks_exact_mut(stride).zip(data.chunks_exact(width)) {
                row[..width].copy_from_slice(src);
            }
            gst::Buffer::from_mut_slice(padded)
        };
        if let (Some(buffer), Some(frame_ns)) = (buffer.get_mut(), self.frame_ns) {
            buffer.set_pts(gst::ClockTime::from_nseconds(frame_ns * u64::from(self.frames)));
            buffer.set_duration(gst::ClockTime::from_nseconds(frame_ns));
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| Error::Gst(format!("failed to push frame to {:?}: {e:?}", self.path)))?;
        self.frames += 1;
        Ok(())
    }

    /// Send EOS and wait for the muxer to finish the file. Idempotent.
    pub fn finish(&mut self) -> Result<u32> {
        if self.finished {
            return Ok(self.frames);
        }
        self.finished = true;

        if let Err(e) = self.appsrc.end_of_stream() {
            warn!("failed to send EOS to {:?}: {:?}", self.path, e);
        }

        let mut failure = None;
        let mut drained = false;
        if let Some(bus) = self.pipeline.bus() {
            for msg in bus.iter_timed(gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS)) {
                match msg.view() {
                    gst::MessageView::Eos(..) => {
                        drained = true;
                        break;
                    }
                    gst::MessageView::Error(err) => {
                        failure = Some(format!("{} ({:?})", err.error(), err.debug()));
                        break;
                    }
                    _ => {}
                }
            }
        }
        let _ = self.pipeline.set_state(gst::State::Null);

        if let Some(reason) = failure {
            return Err(Error::Gst(format!("writing {:?} failed: {reason}", self.path)));
        }
        if !drained {
            warn!("no EOS from {:?} within {}s", self.path, EOS_TIMEOUT_SECS);
        }
        debug!("closed {:?} after {} frames", self.path, self.frames);
        Ok(self.frames)
    }
}

impl Drop for AviWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("failed to finish {:?}: {}", self.path, e);
        }
    }
}

/// Demuxing reader for single-channel recordings
pub struct AviReader {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    info: gst_video::VideoInfo,
    header: AviHeader,
}

impl AviReader {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::metadata(path)?;
        init()?;

        let filesrc = gst::ElementFactory::make("filesrc")
            .property("location", path.to_string_lossy().to_string())
            .build()
            .map_err(|e| Error::Gst(format!("failed to create filesrc: {e}")))?;
        let demux = gst::ElementFactory::make("avidemux")
            .build()
            .map_err(|e| Error::Gst(format!("failed to create avidemux: {e}")))?;
        let caps = gst_video::VideoCapsBuilder::new()
            .format(gst_video::VideoFormat::Gray8)
            .build();
        // Pacing is up to the caller, so no clock sync
        let appsink = gst_app::AppSink::builder()
            .name("sink")
            .caps(&caps)
            .max_buffers(2)
            .sync(false)
            .build();

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many([&filesrc, &demux, appsink.upcast_ref()])
            .map_err(|e| Error::Gst(format!("failed to add elements: {e}")))?;
        filesrc
            .link(&demux)
            .map_err(|e| Error::Gst(format!("failed to link filesrc: {e}")))?;

        let sink_pad = appsink
            .static_pad("sink")
            .ok_or_else(|| Error::Gst("appsink has no sink pad".into()))?;
        demux.connect_pad_added(move |_, pad| {
            if sink_pad.is_linked() || !pad.name().starts_with("video_") {
                return;
            }
            if let Err(e) = pad.link(&sink_pad) {
                warn!("failed to link demuxed {}: {:?}", pad.name(), e);
            }
        });

        let fail = |reason: String| {
            let _ = pipeline.set_state(gst::State::Null);
            Error::InvalidFormat(format!("{path:?}: {reason}"))
        };
        if let Err(e) = pipeline.set_state(gst::State::Paused) {
            return Err(fail(bus_error(&pipeline).unwrap_or_else(|| e.to_string())));
        }
        let (prerolled, _, _) = pipeline.state(gst::ClockTime::from_seconds(READ_TIMEOUT_SECS));
        if let Err(e) = prerolled {
            return Err(fail(bus_error(&pipeline).unwrap_or_else(|| e.to_string())));
        }

        let negotiated = appsink
            .static_pad("sink")
            .and_then(|pad| pad.current_caps())
            .ok_or_else(|| fail("no 8-bit gray video stream".into()))?;
        let info = gst_video::VideoInfo::from_caps(&negotiated).map_err(|e| fail(e.to_string()))?;
        let header = AviHeader {
            width: info.width(),
            height: info.height(),
            fps: fraction_to_fps(info.fps()),
        };

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            return Err(fail(e.to_string()));
        }
        info!("playing {:?}: {:?}", path, header);

        Ok(Self {
            pipeline,
            appsink,
            info,
            header,
        })
    }

    pub fn header(&self) -> &AviHeader {
        &self.header
    }

    /// Next frame payload without row padding, `None` at end of stream
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let Some(sample) = self
            .appsink
            .try_pull_sample(gst::ClockTime::from_seconds(READ_TIMEOUT_SECS))
        else {
            if !self.appsink.is_eos() {
                warn!("no frame within {}s", READ_TIMEOUT_SECS);
            }
            return None;
        };
        let buffer = sample.buffer()?;
        let map = buffer.map_readable().ok()?;

        let width = self.header.width as usize;
        let height = self.header.height as usize;
        let stride = self.info.stride()[0] as usize;
        if stride == width {
            return map.as_slice().get(..width * height).map(Bytes::copy_from_slice);
        }
        let mut out = BytesMut::with_capacity(width * height);
        for row in map.as_slice().chunks(stride).take(height) {
            out.extend_from_slice(row.get(..width)?);
        }
        (out.len() == width * height).then(|| out.freeze())
    }
}

impl Drop for AviReader {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
