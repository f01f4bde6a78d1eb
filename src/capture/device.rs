//! Device source: a capture worker parameterized over its read strategy

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tracing::{error, info, instrument, warn};

use super::control::AuxControl;
use super::format::{DeviceFormat, FormatTable};
use super::frame::{Frame, RecordItem};
use super::source::{Capture, FrameSource};
use crate::error::{Error, Result};
use crate::pipeline::fps::FpsTracker;
use crate::pipeline::queue::BoundedQueue;
use crate::pipeline::status::DisplayItem;
use crate::pipeline::worker::{Control, Task, Worker, WorkerOptions, WorkerState};
use crate::ui::{bind, ActionSpec, ActionValue};
use crate::utils::now_epoch;
use crate::CaptureConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Live device; frames also feed the recorder
    Camera,
    /// Recording replayed in a loop; display only
    FileLoop,
}

impl DeviceKind {
    pub fn display_name(self) -> &'static str {
        match self {
            DeviceKind::Camera => "Camera",
            DeviceKind::FileLoop => "Video",
        }
    }
}

struct CaptureTask<S> {
    source: S,
    tracker: FpsTracker,
    display: BoundedQueue<DisplayItem>,
    record: Option<BoundedQueue<RecordItem>>,
    selected: Arc<ArcSwapOption<DeviceFormat>>,
    applied: Option<DeviceFormat>,
    reopen_backoff: Duration,
    /// Set by an end-of-stream reopen, cleared by the next frame
    rewound: bool,
    sequence: u64,
}

impl<S: FrameSource> CaptureTask<S> {
    fn apply_selected_format(&mut self) {
        let Some(format) = self.selected.load_full().as_deref().copied() else {
            return;
        };
        if self.applied == Some(format) {
            return;
        }
        match self.source.apply_format(&format) {
            Ok(()) => {
                info!(source = self.source.name(), format = %format.label(), "format applied");
                self.applied = Some(format);
            }
            Err(e) => error!(source = self.source.name(), "failed to apply format: {}", e),
        }
    }

    fn publish(&mut self, capture: Capture, before: f64, after: f64) {
        let capture_fps_label = self.tracker.update_label(before, after);
        self.sequence += 1;

        let frame = Frame {
            captured_at: capture.captured_at.unwrap_or(after),
            pixels: capture.pixels,
            source_fps: self.source.nominal_fps(),
            sequence: self.sequence,
        };

        if let Some(record) = &self.record {
            self.display.try_push(DisplayItem::Frame {
                frame: frame.clone(),
                capture_fps_label,
            });
            record.try_push(RecordItem::Frame(frame));
        } else {
            self.display.try_push(DisplayItem::Frame {
                frame,
                capture_fps_label,
            });
        }
    }

    /// One timed read. False when the session has to end.
    fn read_once(&mut self) -> bool {
        let before = now_epoch();
        let result = self.source.read();
        let after = now_epoch();

        match result {
            Ok(capture) => {
                self.rewound = false;
                self.publish(capture, before, after);
                true
            }
            Err(e) if e.is_fatal_for_session() => {
                error!(source = self.source.name(), "ending session: {}", e);
                false
            }
            Err(e) => {
                self.recover(&e);
                true
            }
        }
    }

    /// Close and reopen the source in place. Never ends the thread.
    fn recover(&mut self, err: &Error) {
        match err {
            Error::EndOfStream(_) => {
                // Two rewinds without a frame between them: the recording is empty
                if self.rewound {
                    thread::sleep(self.reopen_backoff);
                }
                self.rewound = true;
            }
            _ => {
                metrics::counter!("capture_read_failures_total").increment(1);
                warn!(source = self.source.name(), "read failed, reopening: {}", err);
            }
        }
        if let Err(e) = self.source.reopen() {
            warn!(source = self.source.name(), "reopen failed: {}", e);
            thread::sleep(self.reopen_backoff);
            return;
        }
        // A reopened device comes back with its default mode
        self.applied = None;
        self.apply_selected_format();
    }
}

impl<S: FrameSource> Task for CaptureTask<S> {
    fn run_session(&mut self, control: &Control) {
        self.apply_selected_format();
        self.tracker.clear();

        while !control.stop_requested() {
            if !self.read_once() {
                break;
            }
        }
    }

    fn release(&mut self) {
        info!(source = self.source.name(), "releasing source");
        self.source.release();
    }
}

/// Controller-side handle of a capture worker
pub struct DeviceSource {
    name: String,
    kind: DeviceKind,
    worker: Worker,
    formats: FormatTable,
    selected: Arc<ArcSwapOption<DeviceFormat>>,
    aux: Option<Mutex<Box<dyn AuxControl>>>,
}

impl DeviceSource {
    /// Live device feeding both the display and the record queue.
    /// The first entry of `formats` is selected.
    #[instrument(skip_all, fields(name = %name))]
    pub fn camera<S: FrameSource>(
        name: &str,
        source: S,
        formats: FormatTable,
        aux: Option<Box<dyn AuxControl>>,
        display: BoundedQueue<DisplayItem>,
        record: BoundedQueue<RecordItem>,
        config: &CaptureConfig,
    ) -> Result<Self> {
        Self::spawn(
            name,
            DeviceKind::Camera,
            source,
            formats,
            aux,
            display,
            Some(record),
            config,
        )
    }

    /// Looping playback feeding the display queue only
    #[instrument(skip_all, fields(name = %name))]
    pub fn file_loop<S: FrameSource>(
        name: &str,
        source: S,
        display: BoundedQueue<DisplayItem>,
        config: &CaptureConfig,
    ) -> Result<Self> {
        Self::spawn(
            name,
            DeviceKind::FileLoop,
            source,
            FormatTable::default(),
            None,
            display,
            None,
            config,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn<S: FrameSource>(
        name: &str,
        kind: DeviceKind,
        source: S,
        formats: FormatTable,
        aux: Option<Box<dyn AuxControl>>,
        display: BoundedQueue<DisplayItem>,
        record: Option<BoundedQueue<RecordItem>>,
        config: &CaptureConfig,
    ) -> Result<Self> {
        let selected = Arc::new(ArcSwapOption::from(formats.get(0).copied().map(Arc::new)));
        let task = CaptureTask {
            source,
            tracker: FpsTracker::new(kind.display_name(), config.fps_window),
            display,
            record,
            selected: Arc::clone(&selected),
            applied: None,
            reopen_backoff: Duration::from_millis(config.reopen_backoff_ms),
            rewound: false,
            sequence: 0,
        };
        let worker = Worker::spawn(
            WorkerOptions {
                pin_core: config.pin_core,
                ..WorkerOptions::named(format!("capture-{name}"))
            },
            task,
        )?;
        info!(kind = ?kind, formats = formats.len(), "device opened");

        Ok(Self {
            name: name.to_string(),
            kind,
            worker,
            formats,
            selected,
            aux: aux.map(Mutex::new),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
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

    pub fn formats(&self) -> &FormatTable {
        &self.formats
    }

    pub fn selected_format(&self) -> Option<DeviceFormat> {
        self.selected.load_full().as_deref().copied()
    }

    /// Stop, switch to `formats[index]`, start again
    pub fn select_format(&self, index: usize) -> Result<()> {
        let format = *self
            .formats
            .get(index)
            .ok_or_else(|| Error::Device(format!("no format at index {index}")))?;
        self.worker.stop();
        self.selected.store(Some(Arc::new(format)));
        self.worker.start();
        Ok(())
    }

    /// Flip the auxiliary control, if the device has one
    pub fn toggle_aux(&self) -> Result<bool> {
        let aux = self
            .aux
            .as_ref()
            .ok_or_else(|| Error::Device(format!("{} has no auxiliary control", self.name)))?;
        aux.lock().unwrap_or_else(PoisonError::into_inner).toggle()
    }

    pub fn action_specs(self: &Arc<Self>) -> Vec<ActionSpec> {
        let mut specs = vec![
            ActionSpec::action(
                "Start Device",
                "play.svg",
                bind(self, |device, _| {
                    device.start();
                }),
            ),
            ActionSpec::action(
                "Stop Device",
                "stop.svg",
                bind(self, |device, _| {
                    device.stop();
                }),
            ),
        ];

        if self.kind == DeviceKind::Camera && !self.formats.is_empty() {
            specs.push(ActionSpec::choice(
                "Format - Size - FPS",
                self.formats.labels(),
                bind(self, |device, value| {
                    if let ActionValue::Index(index) = value {
                        if let Err(e) = device.select_format(index) {
                            error!("format change failed: {}", e);
                        }
                    }
                }),
            ));
        }

        if let Some(aux) = &self.aux {
            let aux = aux.lock().unwrap_or_else(PoisonError::into_inner);
            specs.push(ActionSpec::action(
                aux.label(),
                aux.icon(),
                bind(self, |device, _| {
                    if let Err(e) = device.toggle_aux() {
                        error!("auxiliary control failed: {}", e);
                    }
                }),
            ));
        }

        specs
    }
}
