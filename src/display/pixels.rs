//! Conversion of frame pixel buffers to RGBA8 for the UI

use crate::capture::frame::{PixelBuffer, SampleType};
use crate::error::{Error, Result};

/// Tightly packed RGBA8 image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Convert any supported buffer to RGBA8.
///
/// Gray buffers are replicated into the three color channels. 16-bit buffers
/// are min/max normalized to the full 8-bit range first.
pub fn to_rgba(pixels: &PixelBuffer) -> Result<DisplayImage> {
    let shape = pixels.shape();
    let spp = shape.samples_per_pixel();
    if !matches!(spp, 1 | 3 | 4) {
        return Err(Error::UnsupportedBufferShape(format!(
            "{shape} (display needs 1, 3 or 4 channels)"
        )));
    }

    let normalized;
    let samples: &[u8] = match pixels.sample() {
        SampleType::U8 => pixels.as_u8()?,
        SampleType::U16 => {
            normalized = normalize_u16(pixels.data());
            &normalized
        }
    };

    let mut rgba = Vec::with_capacity(shape.height as usize * shape.width as usize * 4);
    match spp {
        1 => {
            for &v in samples {
                rgba.extend_from_slice(&[v, v, v, 255]);
            }
        }
        3 => {
            for chunk in samples.chunks_exact(3) {
                rgba.push(chunk[0]); // R
                rgba.push(chunk[1]); // G
                rgba.push(chunk[2]); // B
                rgba.push(255); // A
            }
        }
        _ => rgba.extend_from_slice(samples),
    }

    Ok(DisplayImage {
        width: shape.width,
        height: shape.height,
        rgba,
    })
}

/// Stretch little-endian u16 samples to 0..=255. A flat image maps to 0.
fn normalize_u16(data: &[u8]) -> Vec<u8> {
    let values: Vec<u16> = data
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    let (Some(&min), Some(&max)) = (values.iter().min(), values.iter().max()) else {
        return Vec::new();
    };
    let range = (max - min) as f64;
    values
        .iter()
        .map(|&v| {
            if range == 0.0 {
                0
            } else {
                ((v - min) as f64 / range * 255.0) as u8
            }
        })
        .collect()
}
