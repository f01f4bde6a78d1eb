use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use trec::capture::format::{DeviceFormat, FormatTable, Fourcc};
use trec::capture::frame::{Frame, PixelBuffer, RecordItem};
use trec::capture::source::{Capture, FrameSource};
use trec::capture::DeviceKind;
use trec::display::DisplayImage;
use trec::pipeline::status::{DisplayItem, RecorderNotice, StatusMessage};
use trec::pipeline::{BoundedQueue, WorkerState};
use trec::record::avi::AviReader;
use trec::record::mux::{self, Channel};
use trec::record::{AviWriterFactory, FrameWriter, Geometry, Recorder, WriterFactory};
use trec::ui::{find, ActionValue};
use trec::{Config, DeviceSource, Error, Pipeline, UiSink};

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

/// Camera stand-in: RGB frames at a fixed period, failing on schedule
struct Scripted {
    reads: u64,
    fail_every: Option<u64>,
    period: Duration,
    reopens: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    applied: Arc<Mutex<Vec<DeviceFormat>>>,
}

#[derive(Clone, Default)]
struct Counters {
    reopens: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    applied: Arc<Mutex<Vec<DeviceFormat>>>,
}

impl Scripted {
    fn new(fail_every: Option<u64>, counters: &Counters) -> Self {
        Self {
            reads: 0,
            fail_every,
            period: Duration::from_millis(2),
            reopens: Arc::clone(&counters.reopens),
            releases: Arc::clone(&counters.releases),
            applied: Arc::clone(&counters.applied),
        }
    }
}

impl FrameSource for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn read(&mut self) -> trec::Result<Capture> {
        thread::sleep(self.period);
        self.reads += 1;
        if matches!(self.fail_every, Some(n) if self.reads % n == 0) {
            return Err(Error::read_failure("scripted", "no frame"));
        }
        let data: Vec<u8> = (0..4 * 8 * 3).map(|i| (i as u64 + self.reads) as u8).collect();
        Ok(Capture {
            pixels: PixelBuffer::rgb8(4, 8, data)?,
            captured_at: None,
        })
    }

    fn reopen(&mut self) -> trec::Result<()> {
        self.reopens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn apply_format(&mut self, format: &DeviceFormat) -> trec::Result<()> {
        self.applied.lock().unwrap().push(*format);
        Ok(())
    }

    fn nominal_fps(&self) -> f64 {
        500.0
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CapturingUi {
    images: AtomicUsize,
    statuses: Mutex<Vec<StatusMessage>>,
}

impl CapturingUi {
    fn queue_stats(&self) -> usize {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|s| matches!(s, StatusMessage::Queue(_)))
            .count()
    }

    fn notices(&self) -> Vec<RecorderNotice> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                StatusMessage::Recorder(notice) => Some(notice.clone()),
                _ => None,
            })
            .collect()
    }
}

impl UiSink for CapturingUi {
    fn show_image(&self, _image: DisplayImage) {
        self.images.fetch_add(1, Ordering::SeqCst);
    }

    fn show_status(&self, status: StatusMessage) {
        self.statuses.lock().unwrap().push(status);
    }
}

fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.record.output_dir = dir.to_path_buf();
    config.capture.reopen_backoff_ms = 1;
    // Roomy queues so status messages are not dropped under test load
    config.pipeline.queue_capacity = 32;
    config
}

fn formats() -> FormatTable {
    let rgb = Fourcc(*b"RGB3");
    FormatTable::new([
        DeviceFormat::new(rgb, 8, 4, 500),
        DeviceFormat::new(rgb, 16, 8, 250),
    ])
}

#[test]
fn read_failures_are_recovered_without_stopping() {
    let dir = tempfile::tempdir().unwrap();
    let ui = Arc::new(CapturingUi::default());
    let writers = Arc::new(AviWriterFactory::new(Fourcc(*b"Y800")));
    let mut pipeline = Pipeline::with_config(test_config(dir.path()), ui.clone(), writers).unwrap();

    let counters = Counters::default();
    pipeline
        .open_source(DeviceKind::Camera, Scripted::new(Some(3), &counters), formats(), None)
        .unwrap();
    let device = pipeline.device().unwrap().clone();
    assert!(device.start());

    wait_until("recoveries", || counters.reopens.load(Ordering::SeqCst) >= 3);
    wait_until("images", || ui.images.load(Ordering::SeqCst) >= 3);
    assert_eq!(device.state(), WorkerState::Running);
    assert_eq!(device.sessions(), 1);

    pipeline.shutdown();
    assert_eq!(device.state(), WorkerState::Terminated);
    assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
}

const SCRIPT_READS: u64 = 10;
const FAILING_READ: u64 = 4;

/// Ten reads with the fourth failing; the device is gone after that
struct Countdown {
    reads: u64,
    reopened_at: Arc<Mutex<Vec<u64>>>,
}

impl FrameSource for Countdown {
    fn name(&self) -> &str {
        "countdown"
    }

    fn read(&mut self) -> trec::Result<Capture> {
        self.reads += 1;
        if self.reads == FAILING_READ || self.reads > SCRIPT_READS {
            thread::sleep(Duration::from_millis(1));
            return Err(Error::read_failure("countdown", "no frame"));
        }
        Ok(Capture {
            pixels: PixelBuffer::gray8(1, 1, vec![self.reads as u8])?,
            captured_at: None,
        })
    }

    fn reopen(&mut self) -> trec::Result<()> {
        self.reopened_at.lock().unwrap().push(self.reads);
        Ok(())
    }

    fn nominal_fps(&self) -> f64 {
        100.0
    }

    fn release(&mut self) {}
}

#[test]
fn every_read_after_a_failure_still_yields_a_frame() {
    let display = BoundedQueue::new("display", 32);
    let record = BoundedQueue::new("record", 32);
    let reopened_at = Arc::new(Mutex::new(Vec::new()));
    let mut config = Config::default().capture;
    config.reopen_backoff_ms = 1;

    let source = Countdown {
        reads: 0,
        reopened_at: Arc::clone(&reopened_at),
    };
    let device = DeviceSource::camera(
        "countdown",
        source,
        FormatTable::default(),
        None,
        display.clone(),
        record.clone(),
        &config,
    )
    .unwrap();
    assert!(device.start());
    wait_until("the script to run out", || {
        reopened_at.lock().unwrap().iter().any(|&at| at > SCRIPT_READS)
    });
    device.quit();

    let mut reads = Vec::new();
    let mut sequences = Vec::new();
    while let Some(item) = display.pop_timeout(Duration::ZERO) {
        match item {
            DisplayItem::Frame { frame, .. } => {
                reads.push(u64::from(frame.pixels.data()[0]));
                sequences.push(frame.sequence);
            }
            _ => panic!("device sources only publish frames"),
        }
    }
    let expected: Vec<u64> = (1..=SCRIPT_READS).filter(|&r| r != FAILING_READ).collect();
    assert_eq!(reads, expected);
    assert_eq!(sequences, (1..SCRIPT_READS).collect::<Vec<_>>());
    assert_eq!(record.len() as u64, SCRIPT_READS - 1);

    let reopened_at = reopened_at.lock().unwrap();
    assert_eq!(reopened_at[0], FAILING_READ);
    assert_eq!(reopened_at.iter().filter(|&&at| at <= SCRIPT_READS).count(), 1);
}

#[test]
fn action_specs_drive_the_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let ui = Arc::new(CapturingUi::default());
    let writers = Arc::new(AviWriterFactory::new(Fourcc(*b"Y800")));
    let mut pipeline = Pipeline::with_config(test_config(dir.path()), ui.clone(), writers).unwrap();

    let counters = Counters::default();
    let specs = pipeline
        .open_source(DeviceKind::Camera, Scripted::new(None, &counters), formats(), None)
        .unwrap();
    let labels: Vec<&str> = specs.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(
        labels,
        [
            "Start Device",
            "Stop Device",
            "Format - Size - FPS",
            "Start Recording",
            "Stop Recording",
            "Save String"
        ]
    );

    let device = pipeline.device().unwrap().clone();
    find(&specs, "Start Device").unwrap().invoke(ActionValue::Trigger);
    find(&specs, "Start Device").unwrap().invoke(ActionValue::Trigger);
    assert_eq!(device.state(), WorkerState::Running);
    assert_eq!(device.sessions(), 1);

    // Switching formats restarts the session with the new mode applied first
    find(&specs, "Format - Size - FPS")
        .unwrap()
        .invoke(ActionValue::Index(1));
    assert_eq!(device.state(), WorkerState::Running);
    assert_eq!(device.sessions(), 2);
    assert_eq!(device.selected_format(), formats().get(1).copied());
    wait_until("format applied", || {
        counters.applied.lock().unwrap().last().copied() == formats().get(1).copied()
    });

    find(&specs, "Stop Device").unwrap().invoke(ActionValue::Trigger);
    assert_eq!(device.state(), WorkerState::Stopped);

    pipeline.close_device();
    assert!(pipeline.device().is_none());
    assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
    // Actions on a closed device do nothing
    find(&specs, "Start Device").unwrap().invoke(ActionValue::Trigger);
    assert_eq!(device.state(), WorkerState::Terminated);
}

#[test]
fn camera_recording_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let ui = Arc::new(CapturingUi::default());
    let writers = Arc::new(AviWriterFactory::new(Fourcc(*b"Y800")));
    let mut pipeline = Pipeline::with_config(test_config(dir.path()), ui.clone(), writers).unwrap();

    let counters = Counters::default();
    let specs = pipeline
        .open_source(DeviceKind::Camera, Scripted::new(None, &counters), formats(), None)
        .unwrap();
    find(&specs, "Save String")
        .unwrap()
        .invoke(ActionValue::Text("run1".into()));
    find(&specs, "Start Device").unwrap().invoke(ActionValue::Trigger);
    find(&specs, "Start Recording").unwrap().invoke(ActionValue::Trigger);

    wait_until("recorded frames", || ui.queue_stats() >= 10);
    find(&specs, "Stop Recording").unwrap().invoke(ActionValue::Trigger);
    let recorder = pipeline.recorder().unwrap().clone();
    assert_eq!(recorder.state(), WorkerState::Stopped);
    pipeline.shutdown();

    let notices = ui.notices();
    let (path, frames) = match notices.last() {
        Some(RecorderNotice::Finished { path, frames }) => (path.clone(), *frames),
        other => panic!("unexpected {other:?}"),
    };
    assert!(frames >= 10);
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("scripted_D"), "{name}");
    assert!(name.ends_with("_R24x4_F500_run1.avi"), "{name}");

    let mut reader = AviReader::open(&path).unwrap();
    assert_eq!((reader.header().width, reader.header().height), (24, 4));

    let mut stamps = Vec::new();
    while let Some(data) = reader.next_frame() {
        stamps.push(mux::decode_timestamp(&data).unwrap());
    }
    assert_eq!(stamps.len() as u64, frames);
    assert!(stamps.windows(2).all(|w| w[0] < w[1]), "capture order kept");
}

#[test]
fn recording_plays_back_with_embedded_times() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.avi");
    let stamps = [100.25, 100.5, 100.75];
    {
        let mut writer =
            trec::record::avi::AviWriter::create(&path, 24, 4, 50.0, Fourcc(*b"Y800")).unwrap();
        for t in stamps {
            let frame = Frame {
                captured_at: t,
                pixels: PixelBuffer::rgb8(4, 8, vec![9; 96]).unwrap(),
                source_fps: 50.0,
                sequence: 0,
            };
            writer.write_frame(mux::multiplex(&frame).unwrap().data).unwrap();
        }
    }

    let ui = Arc::new(CapturingUi::default());
    let mut config = test_config(dir.path());
    config.capture.file.embedded_time = true;
    config.capture.file.pace = false;
    let writers = Arc::new(AviWriterFactory::new(Fourcc(*b"Y800")));
    let mut pipeline = Pipeline::with_config(config, ui.clone(), writers).unwrap();

    let specs = pipeline.open_file(&path).unwrap();
    let labels: Vec<&str> = specs.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, ["Start Device", "Stop Device"]);
    assert!(pipeline.recorder().is_none());

    let device = pipeline.device().unwrap().clone();
    assert_eq!(device.kind(), DeviceKind::FileLoop);
    device.start();
    // Looping past the end keeps the session alive
    wait_until("looped playback", || ui.images.load(Ordering::SeqCst) >= 7);
    assert_eq!(device.state(), WorkerState::Running);
    pipeline.shutdown();
}

/// Writer whose writes wait for a gate, so the queue fills behind it
#[derive(Default)]
struct Gate {
    opened: AtomicBool,
    open: Mutex<bool>,
    released: Condvar,
    written: Mutex<Vec<f64>>,
    closes: AtomicUsize,
}

impl Gate {
    fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.released.notify_all();
    }
}

struct GateWriter(Arc<Gate>);

impl FrameWriter for GateWriter {
    fn write(&mut self, channel: &Channel) -> trec::Result<()> {
        let mut open = self.0.open.lock().unwrap();
        while !*open {
            open = self.0.released.wait(open).unwrap();
        }
        drop(open);
        let stamp = mux::decode_timestamp(&channel.data).unwrap();
        self.0.written.lock().unwrap().push(stamp);
        Ok(())
    }

    fn close(&mut self) -> trec::Result<()> {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct GateFactory(Arc<Gate>);

impl WriterFactory for GateFactory {
    fn open(&self, _path: &Path, _geometry: Geometry) -> trec::Result<Box<dyn FrameWriter>> {
        self.0.opened.store(true, Ordering::SeqCst);
        Ok(Box::new(GateWriter(Arc::clone(&self.0))))
    }
}

fn item(captured_at: f64) -> RecordItem {
    RecordItem::Frame(Frame {
        captured_at,
        pixels: PixelBuffer::rgb8(2, 4, vec![1; 24]).unwrap(),
        source_fps: 30.0,
        sequence: 0,
    })
}

#[test]
fn sentinel_after_a_nearly_full_queue() {
    const CAPACITY: usize = 5;
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Gate::default());
    let queue = BoundedQueue::new("record", CAPACITY);
    let display = BoundedQueue::<DisplayItem>::new("display", 64);
    let config = test_config(dir.path());
    let recorder = Arc::new(
        Recorder::spawn(
            "cam",
            queue.clone(),
            display,
            Arc::new(GateFactory(Arc::clone(&gate))),
            &config.record,
        )
        .unwrap(),
    );

    // Stale items are dropped by START
    queue.try_push(item(0.5));
    assert!(recorder.start());
    assert!(queue.is_empty());
    queue.try_push(item(1.0));
    wait_until("writer open", || gate.opened.load(Ordering::SeqCst));

    // Blocked on the first write: C-1 frames queue up behind it
    let stamps: Vec<f64> = (0..CAPACITY - 1).map(|i| 100.0 + i as f64).collect();
    for &t in &stamps {
        assert!(queue.try_push(item(t)));
    }

    let stopper = {
        let recorder = Arc::clone(&recorder);
        thread::spawn(move || recorder.stop())
    };
    wait_until("sentinel queued", || queue.is_full());
    gate.release();
    assert!(stopper.join().unwrap());

    assert_eq!(recorder.state(), WorkerState::Stopped);
    assert_eq!(gate.closes.load(Ordering::SeqCst), 1);
    let written = gate.written.lock().unwrap();
    assert_eq!(written.len(), CAPACITY);
    assert_eq!(written[0], 1.0);
    assert_eq!(&written[1..], stamps.as_slice());
    assert!(queue.is_empty());

    recorder.quit();
    assert_eq!(gate.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn unwritable_directory_reports_failure() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"").unwrap();

    let ui = Arc::new(CapturingUi::default());
    let mut config = test_config(dir.path());
    config.record.output_dir = PathBuf::from(&blocker).join("recordings");
    let writers = Arc::new(AviWriterFactory::new(Fourcc(*b"Y800")));
    let mut pipeline = Pipeline::with_config(config, ui.clone(), writers).unwrap();

    let counters = Counters::default();
    pipeline
        .open_source(DeviceKind::Camera, Scripted::new(None, &counters), formats(), None)
        .unwrap();
    pipeline.device().unwrap().start();
    let recorder = pipeline.recorder().unwrap().clone();
    recorder.start();

    wait_until("failure notice", || {
        ui.notices()
            .iter()
            .any(|n| matches!(n, RecorderNotice::Failed { .. }))
    });
    wait_until("recorder stopped", || recorder.state() == WorkerState::Stopped);
    assert!(!recorder.stop());
    pipeline.shutdown();
}
