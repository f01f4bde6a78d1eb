//! Wiring of one device, its recorder and the display sink

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};

use super::queue::BoundedQueue;
use super::status::DisplayItem;
use crate::capture::control::{AuxControl, UvcLed};
use crate::capture::file::FileLoopSource;
use crate::capture::format::{FormatTable, Fourcc};
use crate::capture::frame::RecordItem;
use crate::capture::source::FrameSource;
use crate::capture::v4l2::{enumerate_formats, V4l2Source};
use crate::capture::{DeviceKind, DeviceSource};
use crate::display::DisplaySink;
use crate::error::{Error, Result};
use crate::record::{AviWriterFactory, Recorder, WriterFactory};
use crate::ui::{ActionSpec, UiSink};
use crate::{Config, CONFIG};

/// Owns both queues and the display sink; holds at most one open device
pub struct Pipeline {
    config: Config,
    display_queue: BoundedQueue<DisplayItem>,
    record_queue: BoundedQueue<RecordItem>,
    display: DisplaySink,
    writers: Arc<dyn WriterFactory>,
    device: Option<Arc<DeviceSource>>,
    recorder: Option<Arc<Recorder>>,
}

impl Pipeline {
    /// Pipeline on the global configuration, recording AVI files
    pub fn new(ui: Arc<dyn UiSink>) -> Result<Self> {
        let config = CONFIG.load_full().as_ref().clone();
        let codec = Fourcc::parse(&config.record.codec)
            .ok_or_else(|| Error::InvalidFormat(format!("codec {:?}", config.record.codec)))?;
        Self::with_config(config, ui, Arc::new(AviWriterFactory::new(codec)))
    }

    #[instrument(skip_all)]
    pub fn with_config(
        config: Config,
        ui: Arc<dyn UiSink>,
        writers: Arc<dyn WriterFactory>,
    ) -> Result<Self> {
        let capacity = config.pipeline.queue_capacity;
        let display_queue = BoundedQueue::new("display", capacity);
        let record_queue = BoundedQueue::new("record", capacity);
        let display = DisplaySink::spawn(display_queue.clone(), ui, &config.display)?;
        info!(capacity, "pipeline ready");

        Ok(Self {
            config,
            display_queue,
            record_queue,
            display,
            writers,
            device: None,
            recorder: None,
        })
    }

    pub fn device(&self) -> Option<&Arc<DeviceSource>> {
        self.device.as_ref()
    }

    pub fn recorder(&self) -> Option<&Arc<Recorder>> {
        self.recorder.as_ref()
    }

    /// Open a V4L2 camera, replacing any open device
    pub fn open_camera(&mut self, name: &str, path: &str) -> Result<Vec<ActionSpec>> {
        let formats = enumerate_formats(path)?;
        let source = V4l2Source::open(name, path, self.config.capture.buffer_count)?;
        let aux = UvcLed::for_device(name, path).map(|led| Box::new(led) as Box<dyn AuxControl>);
        self.open_source(DeviceKind::Camera, source, formats, aux)
    }

    /// Play a recording in a loop, replacing any open device
    pub fn open_file(&mut self, path: &Path) -> Result<Vec<ActionSpec>> {
        let source = FileLoopSource::open(path, &self.config.capture.file)?;
        self.open_source(DeviceKind::FileLoop, source, FormatTable::default(), None)
    }

    /// Open any source. Cameras also get a recorder. Returns the device's
    /// actions followed by the recorder's.
    pub fn open_source<S: FrameSource>(
        &mut self,
        kind: DeviceKind,
        source: S,
        formats: FormatTable,
        aux: Option<Box<dyn AuxControl>>,
    ) -> Result<Vec<ActionSpec>> {
        self.close_device();
        let name = source.name().to_string();

        let device = match kind {
            DeviceKind::Camera => DeviceSource::camera(
                &name,
                source,
                formats,
                aux,
                self.display_queue.clone(),
                self.record_queue.clone(),
                &self.config.capture,
            )?,
            DeviceKind::FileLoop => DeviceSource::file_loop(
                &name,
                source,
                self.display_queue.clone(),
                &self.config.capture,
            )?,
        };
        let device = Arc::new(device);
        let mut specs = device.action_specs();

        if kind == DeviceKind::Camera {
            let recorder = Arc::new(Recorder::spawn(
                &name,
                self.record_queue.clone(),
                self.display_queue.clone(),
                Arc::clone(&self.writers),
                &self.config.record,
            )?);
            specs.extend(recorder.action_specs());
            self.recorder = Some(recorder);
        }

        self.device = Some(device);
        Ok(specs)
    }

    /// Quit the recorder, then the device
    pub fn close_device(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            recorder.quit();
        }
        if let Some(device) = self.device.take() {
            device.quit();
            info!(device = device.name(), "device closed");
        }
    }

    /// Close the device and stop the display sink. Idempotent.
    pub fn shutdown(&mut self) {
        self.close_device();
        self.display.quit();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
