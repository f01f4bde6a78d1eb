//! Rolling texture metric: variance of neighbouring-column differences
//! over a sparse set of evenly spaced columns, averaged over recent frames.

use ringbuf::{traits::*, HeapRb};

use crate::capture::frame::PixelBuffer;

/// Per-frame metric. For every row and channel, the variance of the
/// differences between successive sampled columns; averaged over all of them.
pub fn column_difference_variance(pixels: &PixelBuffer, columns: usize) -> f64 {
    let shape = pixels.shape();
    let width = shape.width as usize;
    if columns < 2 || width == 0 || shape.height == 0 {
        return 0.0;
    }
    let cols: Vec<u32> = (0..columns).map(|i| (i * width / columns) as u32).collect();
    let channels = shape.samples_per_pixel() as u32;
    let n = (columns - 1) as f64;

    let mut total = 0.0;
    let mut count = 0usize;
    let mut diffs = Vec::with_capacity(columns - 1);
    for row in 0..shape.height {
        for ch in 0..channels {
            diffs.clear();
            diffs.extend(cols.windows(2).map(|w| {
                pixels.sample_at(row, w[1], ch) as f64 - pixels.sample_at(row, w[0], ch) as f64
            }));
            let mean = diffs.iter().sum::<f64>() / n;
            total += diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
            count += 1;
        }
    }
    total / count as f64
}

pub struct VarianceMeter {
    columns: usize,
    window: HeapRb<f64>,
    len: usize,
}

impl VarianceMeter {
    pub fn new(columns: usize, len: usize) -> Self {
        let len = len.max(1);
        let mut meter = Self {
            columns,
            window: HeapRb::new(len),
            len,
        };
        meter.clear();
        meter
    }

    /// Zero the window
    pub fn clear(&mut self) {
        for _ in 0..self.len {
            self.window.push_overwrite(0.0);
        }
    }

    /// Add `pixels` and return the rolling mean, including this frame
    pub fn update(&mut self, pixels: &PixelBuffer) -> f64 {
        self.window
            .push_overwrite(column_difference_variance(pixels, self.columns));
        self.window.iter().sum::<f64>() / self.len as f64
    }
}
