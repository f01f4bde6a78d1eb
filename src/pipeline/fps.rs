//! Rolling frame-rate accounting shared by the capture, record and display stages

use ringbuf::{traits::*, HeapRb};

/// Timestamps bracketing one blocking read
#[derive(Debug, Clone, Copy)]
struct Sample {
    before: f64,
    after: f64,
}

/// One tracker update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpsReading {
    /// Rate of successive read starts
    pub current_fps: f64,
    /// Rate implied by the idle gap between one read ending and the next starting
    pub max_fps: f64,
    pub utilization_percent: f64,
}

impl FpsReading {
    pub fn label(&self, name: &str) -> String {
        format!(
            "{}: {:05.1} fps ({:05.1} %)",
            name, self.current_fps, self.utilization_percent
        )
    }
}

/// Fixed window of the last N (time_before, time_after) pairs
pub struct FpsTracker {
    name: String,
    window: HeapRb<Sample>,
    len: usize,
}

impl FpsTracker {
    pub fn new(name: impl Into<String>, len: usize) -> Self {
        let len = len.max(2);
        let mut tracker = Self {
            name: name.into(),
            window: HeapRb::new(len),
            len,
        };
        tracker.clear();
        tracker
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Re-seed with increasing start times so the first update never divides by zero.
    /// The window holds exactly `len` samples, so seeding overwrites everything.
    pub fn clear(&mut self) {
        for i in 0..self.len {
            self.window.push_overwrite(Sample {
                before: i as f64,
                after: 0.0,
            });
        }
    }

    pub fn update(&mut self, time_before: f64, time_after: f64) -> FpsReading {
        self.window.push_overwrite(Sample {
            before: time_before,
            after: time_after,
        });

        let mut total = 0.0;
        let mut idle = 0.0;
        let mut prev: Option<Sample> = None;
        for sample in self.window.iter() {
            if let Some(p) = prev {
                total += sample.before - p.before;
                idle += sample.before - p.after;
            }
            prev = Some(*sample);
        }

        let intervals = (self.len - 1) as f64;
        let current_fps = 1.0 / (total / intervals);
        let max_fps = 1.0 / (idle / intervals);
        FpsReading {
            current_fps,
            max_fps,
            utilization_percent: current_fps / max_fps * 100.0,
        }
    }

    /// Update and format with this tracker's name
    pub fn update_label(&mut self, time_before: f64, time_after: f64) -> String {
        let reading = self.update(time_before, time_after);
        reading.label(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(tracker: &mut FpsTracker, period: f64, busy: f64, count: usize) -> FpsReading {
        let start = 1_000.0;
        let mut reading = None;
        for k in 0..count {
            let before = start + k as f64 * period;
            reading = Some(tracker.update(before, before + busy));
        }
        reading.unwrap()
    }

    #[test]
    fn converges_to_read_cadence() {
        let mut tracker = FpsTracker::new("Camera", 20);
        let reading = feed(&mut tracker, 0.05, 0.01, 20);
        assert!((reading.current_fps - 20.0).abs() < 1e-6);
        assert!((reading.max_fps - 25.0).abs() < 1e-6);
        // current / max = (T - d) / T
        assert!((reading.utilization_percent - 80.0).abs() < 1e-6);
    }

    #[test]
    fn first_update_is_finite() {
        let mut tracker = FpsTracker::new("Display", 50);
        let reading = tracker.update(100.0, 100.5);
        assert!(reading.current_fps.is_finite());
        assert!(reading.current_fps > 0.0);
    }

    #[test]
    fn clear_restarts_the_window() {
        let mut tracker = FpsTracker::new("Recorder", 5);
        feed(&mut tracker, 0.1, 0.02, 5);
        tracker.clear();
        let reading = tracker.update(5.0, 5.0);
        // seeded starts 1..=4 plus the new one, one second apart
        assert!((reading.current_fps - 1.0).abs() < 1e-9);
    }

    #[test]
    fn label_matches_display_format() {
        let reading = FpsReading {
            current_fps: 29.97,
            max_fps: 60.0,
            utilization_percent: 49.94,
        };
        assert_eq!(reading.label("Camera"), "Camera: 030.0 fps (049.9 %)");
    }

    #[test]
    fn window_has_minimum_length() {
        assert_eq!(FpsTracker::new("x", 0).len(), 2);
    }
}
