//! Timestamp multiplexing.
//!
//! An `H x W x 3` frame is stored as one `H x 3W` single-channel image: each
//! row holds the three channel planes side by side. The first 8 bytes of row 0
//! are replaced by the little-endian IEEE-754 bytes of the capture time, which
//! is the only per-frame metadata a raw codec can carry.

use bytes::Bytes;

use crate::capture::frame::{Frame, PixelBuffer, SampleType};
use crate::error::{Error, Result};

pub const TIMESTAMP_BYTES: usize = 8;

/// Single-channel image ready for the writer
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub data: Bytes,
    /// Three times the frame width
    pub width: u32,
    pub height: u32,
}

pub fn encode_timestamp(channel: &mut [u8], captured_at: f64) -> Result<()> {
    let len = channel.len();
    let head = channel.get_mut(..TIMESTAMP_BYTES).ok_or_else(|| {
        Error::UnsupportedBufferShape(format!("{len} bytes cannot hold a timestamp"))
    })?;
    head.copy_from_slice(&captured_at.to_le_bytes());
    Ok(())
}

pub fn decode_timestamp(channel: &[u8]) -> Option<f64> {
    let head: [u8; TIMESTAMP_BYTES] = channel.get(..TIMESTAMP_BYTES)?.try_into().ok()?;
    Some(f64::from_le_bytes(head))
}

/// Build the stored channel for `frame`
pub fn multiplex(frame: &Frame) -> Result<Channel> {
    let pixels = &frame.pixels;
    if pixels.sample() != SampleType::U8 {
        return Err(Error::UnsupportedPixelType(format!(
            "{:?} (recording needs 8-bit samples)",
            pixels.sample()
        )));
    }
    let shape = pixels.shape();
    if shape.channels != Some(3) {
        return Err(Error::UnsupportedBufferShape(format!(
            "{shape} (recording needs H x W x 3)"
        )));
    }

    let (height, width) = (shape.height as usize, shape.width as usize);
    let src = pixels.as_u8()?;
    let mut out = vec![0u8; height * width * 3];
    for (src_row, out_row) in src.chunks_exact(width * 3).zip(out.chunks_exact_mut(width * 3)) {
        for (x, px) in src_row.chunks_exact(3).enumerate() {
            out_row[x] = px[0];
            out_row[width + x] = px[1];
            out_row[2 * width + x] = px[2];
        }
    }
    encode_timestamp(&mut out, frame.captured_at)?;

    Ok(Channel {
        data: Bytes::from(out),
        width: (width * 3) as u32,
        height: height as u32,
    })
}

/// Rebuild an interleaved `H x W x 3` image from a stored channel.
/// The timestamp bytes stay in the first pixels of plane 0.
pub fn demultiplex(channel: &[u8], channel_width: u32, height: u32) -> Result<PixelBuffer> {
    if channel_width % 3 != 0 {
        return Err(Error::UnsupportedBufferShape(format!(
            "channel width {channel_width} is not a multiple of 3"
        )));
    }
    let stride = channel_width as usize;
    let width = stride / 3;
    if channel.len() != stride * height as usize {
        return Err(Error::UnsupportedBufferShape(format!(
            "{} bytes for a {}x{} channel",
            channel.len(),
            height,
            channel_width
        )));
    }

    let mut out = Vec::with_capacity(channel.len());
    for row in channel.chunks_exact(stride) {
        for x in 0..width {
            out.extend_from_slice(&[row[x], row[width + x], row[2 * width + x]]);
        }
    }
    PixelBuffer::rgb8(height, width as u32, out)
}
