use std::path::PathBuf;

use crate::capture::frame::Frame;

/// Display-side metrics for one shown frame
#[derive(Debug, Clone, PartialEq)]
pub struct ImageStat {
    /// Rolling variance-of-difference texture metric
    pub variance: f64,
    pub capture_fps_label: String,
    pub display_fps_label: String,
}

impl ImageStat {
    pub fn variance_label(&self) -> String {
        format!("VAR: {:.0}", self.variance)
    }
}

/// Recorder progress for one written frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStat {
    pub record_fps_label: String,
    /// Record queue depth after the frame was taken
    pub queue_depth: usize,
    /// 1-based index of the frame within the file
    pub frame_index: u64,
}

/// Recorder session events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderNotice {
    Started { path: PathBuf },
    Finished { path: PathBuf, frames: u64 },
    Failed { reason: String },
}

/// Everything the UI collaborator is told besides the image itself
#[derive(Debug, Clone, PartialEq)]
pub enum StatusMessage {
    Image(ImageStat),
    Queue(QueueStat),
    Recorder(RecorderNotice),
}

/// Payload of the display queue
#[derive(Debug, Clone)]
pub enum DisplayItem {
    Frame { frame: Frame, capture_fps_label: String },
    Status(StatusMessage),
    /// Ends the display sink loop
    Shutdown,
}
