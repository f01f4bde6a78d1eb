//! Recorder sink: drains the record queue into timestamp-multiplexed files

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{debug, error, info, instrument, warn};

use super::avi::AviWriter;
use super::mux::{self, Channel};
use super::naming::recording_file_name;
use crate::capture::format::Fourcc;
use crate::capture::frame::{Frame, RecordItem};
use crate::error::{Error, Result};
use crate::pipeline::fps::FpsTracker;
use crate::pipeline::queue::BoundedQueue;
use crate::pipeline::status::{DisplayItem, QueueStat, RecorderNotice, StatusMessage};
use crate::pipeline::worker::{Control, Task, Worker, WorkerOptions, WorkerState};
use crate::ui::{bind, ActionSpec, ActionValue};
use crate::utils::now_epoch;
use crate::RecordConfig;

/// Size and rate of the stored channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Destination of one recording session
pub trait FrameWriter: Send {
    fn write(&mut self, channel: &Channel) -> Result<()>;

    /// Flush and finalize. Called once per session.
    fn close(&mut self) -> Result<()>;
}

/// Opens a writer for every recording session
pub trait WriterFactory: Send + Sync + 'static {
    fn open(&self, path: &Path, geometry: Geometry) -> Result<Box<dyn FrameWriter>>;
}

impl FrameWriter for AviWriter {
    fn write(&mut self, channel: &Channel) -> Result<()> {
        self.write_frame(channel.data.clone())
    }

    fn close(&mut self) -> Result<()> {
        self.finish().map(|_| ())
    }
}

/// Single-channel `Y800` AVI files
pub struct AviWriterFactory {
    codec: Fourcc,
}

impl AviWriterFactory {
    pub fn new(codec: Fourcc) -> Self {
        Self { codec }
    }
}

impl WriterFactory for AviWriterFactory {
    fn open(&self, path: &Path, geometry: Geometry) -> Result<Box<dyn FrameWriter>> {
        let writer = AviWriter::create(path, geometry.width, geometry.height, geometry.fps, self.codec)?;
        Ok(Box::new(writer))
    }
}

struct RecordTask {
    device: String,
    queue: BoundedQueue<RecordItem>,
    display: BoundedQueue<DisplayItem>,
    writers: Arc<dyn WriterFactory>,
    tracker: FpsTracker,
    suffix: Arc<ArcSwapOption<String>>,
    output_dir: PathBuf,
    extension: String,
}

impl RecordTask {
    fn notify(&self, notice: RecorderNotice) {
        self.display
            .try_push(DisplayItem::Status(StatusMessage::Recorder(notice)));
    }

    fn fail(&self, err: &Error) {
        error!(device = %self.device, "recording aborted: {}", err);
        self.notify(RecorderNotice::Failed {
            reason: err.to_string(),
        });
    }

    /// Writer for the session whose first frame is `first`
    fn open_writer(&self, first: &Frame, channel: &Channel) -> Result<(Box<dyn FrameWriter>, PathBuf, Geometry)> {
        let geometry = Geometry {
            width: channel.width,
            height: channel.height,
            fps: first.source_fps,
        };
        let suffix = self.suffix.load_full();
        let name = recording_file_name(
            &self.device,
            &chrono::Local::now(),
            geometry.width,
            geometry.height,
            geometry.fps,
            suffix.as_deref().map(String::as_str),
            &self.extension,
        );
        let path = self.output_dir.join(name);

        fs::create_dir_all(&self.output_dir).map_err(|e| Error::WriterOpenFailure {
            path: self.output_dir.clone(),
            reason: e.to_string(),
        })?;
        let writer = self.writers.open(&path, geometry)?;
        Ok((writer, path, geometry))
    }

    fn write_frame(&self, writer: &mut dyn FrameWriter, channel: &Channel, geometry: Geometry) -> Result<()> {
        if (channel.width, channel.height) != (geometry.width, geometry.height) {
            return Err(Error::UnsupportedBufferShape(format!(
                "{}x{} channel in a {}x{} recording",
                channel.width, channel.height, geometry.width, geometry.height
            )));
        }
        writer.write(channel)
    }
}

impl Task for RecordTask {
    /// Frames queued before START belong to no recording
    fn prepare(&mut self) {
        let stale = self.queue.drain();
        if stale > 0 {
            debug!(device = %self.device, stale, "dropped backlog");
        }
    }

    fn run_session(&mut self, _control: &Control) {
        // Stop is signalled by the sentinel alone
        let first = match self.queue.pop() {
            Some(RecordItem::Frame(frame)) => frame,
            Some(RecordItem::Sentinel) | None => {
                info!(device = %self.device, "stopped before the first frame");
                return;
            }
        };

        let opened = mux::multiplex(&first)
            .and_then(|channel| self.open_writer(&first, &channel).map(|w| (w, channel)));
        let ((mut writer, path, geometry), first_channel) = match opened {
            Ok(opened) => opened,
            Err(e) => return self.fail(&e),
        };
        info!(device = %self.device, path = ?path, "recording");
        self.notify(RecorderNotice::Started { path: path.clone() });

        self.tracker.clear();
        let mut pending = Some(first_channel);
        let mut written = 0u64;
        let mut failure = None;

        loop {
            let before = now_epoch();
            let channel = match pending.take() {
                Some(channel) => Ok(channel),
                None => match self.queue.pop() {
                    Some(RecordItem::Frame(frame)) => mux::multiplex(&frame),
                    Some(RecordItem::Sentinel) | None => break,
                },
            };
            let after = now_epoch();
            let depth = self.queue.len();

            if let Err(e) = channel.and_then(|c| self.write_frame(writer.as_mut(), &c, geometry)) {
                failure = Some(e);
                break;
            }
            written += 1;
            metrics::counter!("frames_recorded_total").increment(1);

            let record_fps_label = self.tracker.update_label(before, after);
            self.display.try_push(DisplayItem::Status(StatusMessage::Queue(QueueStat {
                record_fps_label,
                queue_depth: depth,
                frame_index: written,
            })));
        }

        if let Err(e) = writer.close() {
            warn!(device = %self.device, path = ?path, "closing recording failed: {}", e);
        }
        match failure {
            Some(e) => self.fail(&e),
            None => {
                info!(device = %self.device, path = ?path, frames = written, "recording finished");
                self.notify(RecorderNotice::Finished {
                    path,
                    frames: written,
                });
            }
        }
    }
}

/// Controller-side handle of the recorder worker
pub struct Recorder {
    device: String,
    worker: Worker,
    suffix: Arc<ArcSwapOption<String>>,
}

impl Recorder {
    #[instrument(skip_all, fields(device = %device))]
    pub fn spawn(
        device: &str,
        queue: BoundedQueue<RecordItem>,
        display: BoundedQueue<DisplayItem>,
        writers: Arc<dyn WriterFactory>,
        config: &RecordConfig,
    ) -> Result<Self> {
        let suffix = Arc::new(ArcSwapOption::from(
            config.suffix.clone().filter(|s| !s.is_empty()).map(Arc::new),
        ));
        let task = RecordTask {
            device: device.to_string(),
            queue: queue.clone(),
            display,
            writers,
            tracker: FpsTracker::new("Recorder", config.fps_window),
            suffix: Arc::clone(&suffix),
            output_dir: config.output_dir.clone(),
            extension: config.extension.clone(),
        };

        let worker = Worker::spawn(
            WorkerOptions {
                pin_core: config.pin_core,
                interrupt: Some(Box::new(move |control: &Control| {
                    if !queue.push_sentinel(|| control.state() == WorkerState::Running) {
                        debug!("recorder left its session before the sentinel");
                    }
                })),
                ..WorkerOptions::named(format!("record-{device}"))
            },
            task,
        )?;

        Ok(Self {
            device: device.to_string(),
            worker,
            suffix,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn sessions(&self) -> u64 {
        self.worker.sessions()
    }

    pub fn start(&self) -> bool {
        self.worker.start()
    }

    pub fn stop(&self) -> bool {
        self.worker.stop()
    }

    pub fn quit(&self) {
        self.worker.quit()
    }

    /// Suffix appended to the names of later recordings. Blank clears it.
    pub fn set_suffix(&self, suffix: &str) {
        let suffix = suffix.trim();
        if suffix.is_empty() {
            self.suffix.store(None);
        } else {
            self.suffix.store(Some(Arc::new(suffix.to_string())));
        }
        debug!(device = %self.device, suffix, "recording suffix set");
    }

    pub fn suffix(&self) -> Option<String> {
        self.suffix.load_full().map(|s| s.as_ref().clone())
    }

    pub fn action_specs(self: &Arc<Self>) -> Vec<ActionSpec> {
        vec![
            ActionSpec::action(
                "Start Recording",
                "rec.svg",
                bind(self, |recorder, _| {
                    recorder.start();
                }),
            ),
            ActionSpec::action(
                "Stop Recording",
                "stop-2.svg",
                bind(self, |recorder, _| {
                    recorder.stop();
                }),
            ),
            ActionSpec::text(
                "Save String",
                "Record Filename Add-on",
                bind(self, |recorder, value| {
                    if let ActionValue::Text(text) = value {
                        recorder.set_suffix(&text);
                    }
                }),
            ),
        ]
    }
}
