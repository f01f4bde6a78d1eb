//! Display sink: one thread turning display-queue items into UI updates

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, info, instrument};

use super::pixels::to_rgba;
use super::texture::VarianceMeter;
use crate::error::Result;
use crate::pipeline::fps::FpsTracker;
use crate::pipeline::queue::BoundedQueue;
use crate::pipeline::status::{DisplayItem, ImageStat, StatusMessage};
use crate::ui::UiSink;
use crate::utils::now_epoch;
use crate::DisplayConfig;

struct DisplayLoop {
    queue: BoundedQueue<DisplayItem>,
    ui: Arc<dyn UiSink>,
    tracker: FpsTracker,
    meter: VarianceMeter,
}

impl DisplayLoop {
    fn run(mut self) {
        loop {
            let before = now_epoch();
            let Some(item) = self.queue.pop() else {
                break;
            };
            let after = now_epoch();

            match item {
                DisplayItem::Frame {
                    frame,
                    capture_fps_label,
                } => {
                    let started = Instant::now();
                    let display_fps_label = self.tracker.update_label(before, after);
                    let image = match to_rgba(&frame.pixels) {
                        Ok(image) => image,
                        Err(e) => {
                            error!(sequence = frame.sequence, "skipping frame: {}", e);
                            continue;
                        }
                    };
                    self.ui.show_image(image);

                    let variance = self.meter.update(&frame.pixels);
                    self.ui.show_status(StatusMessage::Image(ImageStat {
                        variance,
                        capture_fps_label,
                        display_fps_label,
                    }));
                    metrics::histogram!("display_frame_latency_ms")
                        .record(started.elapsed().as_secs_f64() * 1000.0);
                }
                DisplayItem::Status(status) => self.ui.show_status(status),
                DisplayItem::Shutdown => break,
            }
        }
        debug!("display loop finished");
    }
}

pub struct DisplaySink {
    queue: BoundedQueue<DisplayItem>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DisplaySink {
    #[instrument(skip_all)]
    pub fn spawn(
        queue: BoundedQueue<DisplayItem>,
        ui: Arc<dyn UiSink>,
        config: &DisplayConfig,
    ) -> Result<Self> {
        let display = DisplayLoop {
            queue: queue.clone(),
            ui,
            tracker: FpsTracker::new("Display", config.fps_window),
            meter: VarianceMeter::new(config.variance_columns, config.variance_window),
        };
        let handle = thread::Builder::new()
            .name("display".into())
            .spawn(move || display.run())?;
        info!("display sink running");

        Ok(Self {
            queue,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Stop the loop after everything already queued. Idempotent.
    pub fn quit(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // A dead display thread never frees a slot
            if !self.queue.push_while(DisplayItem::Shutdown, || !handle.is_finished()) {
                debug!("display thread already gone");
            }
            if handle.join().is_err() {
                error!("display thread panicked");
            }
            info!("display sink stopped");
        }
    }
}

impl Drop for DisplaySink {
    fn drop(&mut self) {
        self.quit();
    }
}
