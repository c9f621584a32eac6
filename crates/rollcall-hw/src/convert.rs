//! Raw V4L2 buffer to RGB conversion.

use image::RgbImage;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    ShortBuffer { expected: usize, actual: usize },
    #[error("YUYV frames need an even pixel count, got {0}")]
    OddPixelCount(usize),
}

/// Packed YUYV 4:2:2 (`[Y0, U, Y1, V]` per pixel pair) to RGB, BT.601
/// studio range.
pub fn yuyv_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, ConvertError> {
    let pixels = (width * height) as usize;
    if pixels % 2 != 0 {
        return Err(ConvertError::OddPixelCount(pixels));
    }
    let expected = pixels * 2;
    if buf.len() < expected {
        return Err(ConvertError::ShortBuffer {
            expected,
            actual: buf.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for quad in buf[..expected].chunks_exact(4) {
        let (u, v) = (quad[1], quad[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(quad[0], u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(quad[2], u, v));
    }
    to_image(width, height, rgb, expected)
}

/// 8-bit greyscale to RGB by channel replication.
pub fn grey_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, ConvertError> {
    let pixels = (width * height) as usize;
    if buf.len() < pixels {
        return Err(ConvertError::ShortBuffer {
            expected: pixels,
            actual: buf.len(),
        });
    }
    let rgb = buf[..pixels].iter().flat_map(|&g| [g, g, g]).collect();
    to_image(width, height, rgb, pixels)
}

fn to_image(width: u32, height: u32, rgb: Vec<u8>, expected: usize) -> Result<RgbImage, ConvertError> {
    let actual = rgb.len();
    RgbImage::from_raw(width, height, rgb).ok_or(ConvertError::ShortBuffer { expected, actual })
}

/// Integer BT.601 conversion.
fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}
