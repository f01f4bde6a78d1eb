use jpeg_decoder::{Decoder, PixelFormat as JpegFormat};

use super::frame::{PixelBuffer, PixelFormat, SampleType, Shape};
use crate::error::{Error, Result};

/// Turn a raw device payload into a frame pixel buffer.
///
/// Color payloads come out as interleaved RGB, luminance payloads as 2D buffers.
pub fn decode_frame(data: &[u8], format: PixelFormat, width: u32, height: u32) -> Result<PixelBuffer> {
    let pixels = width as usize * height as usize;
    match format {
        PixelFormat::Mjpeg => decode_mjpeg(data),
        PixelFormat::Rgb24 => {
            let raw = take(data, pixels * 3, format)?;
            PixelBuffer::rgb8(height, width, raw.to_vec())
        }
        PixelFormat::Bgr24 => {
            let raw = take(data, pixels * 3, format)?;
            let mut rgb = Vec::with_capacity(raw.len());
            for chunk in raw.chunks_exact(3) {
                rgb.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
            }
            PixelBuffer::rgb8(height, width, rgb)
        }
        PixelFormat::Yuyv4 => {
            let raw = take(data, pixels * 2, format)?;
            PixelBuffer::rgb8(height, width, yuyv_to_rgb(raw))
        }
        PixelFormat::Grey => {
            let raw = take(data, pixels, format)?;
            PixelBuffer::gray8(height, width, raw.to_vec())
        }
        PixelFormat::Y16 => {
            let raw = take(data, pixels * 2, format)?;
            PixelBuffer::new(raw.to_vec(), Shape::planar(height, width), SampleType::U16)
        }
    }
}

fn take(data: &[u8], len: usize, format: PixelFormat) -> Result<&[u8]> {
    data.get(..len).ok_or_else(|| Error::Decode {
        fourcc: fourcc_name(format),
        reason: format!("truncated payload: {} of {} bytes", data.len(), len),
    })
}

fn fourcc_name(format: PixelFormat) -> String {
    String::from_utf8_lossy(&format.fourcc()).trim_end().to_string()
}

fn decode_mjpeg(data: &[u8]) -> Result<PixelBuffer> {
    let decode_err = |reason: String| Error::Decode {
        fourcc: "MJPG".into(),
        reason,
    };

    let mut decoder = Decoder::new(data);
    let pixels = decoder.decode().map_err(|e| decode_err(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| decode_err("missing image info".into()))?;
    let (width, height) = (info.width as u32, info.height as u32);

    match info.pixel_format {
        JpegFormat::RGB24 => PixelBuffer::rgb8(height, width, pixels),
        JpegFormat::L8 => PixelBuffer::gray8(height, width, pixels),
        other => Err(decode_err(format!("unsupported color space {other:?}"))),
    }
}

/// BT.601 limited-range YUYV (4:2:2) to interleaved RGB
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_pixel(y0, u, v));
        rgb.extend_from_slice(&yuv_pixel(y1, u, v));
    }
    rgb
}

fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}
