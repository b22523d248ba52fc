//! Frame container.
//!
//! - `Frame`: immutable pixel buffer with dimensions, layout and capture timestamp.
//! - `PixelLayout`: channel layout of the buffer (RGB8 or Luma8).
//!
//! Frames are produced by the ingest layer and consumed read-only by every later stage.
//! There is no mutable pixel access; annotation and resizing produce new buffers.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, GrayImage, RgbImage};
use std::time::SystemTime;

/// JPEG quality used when the caller does not pick one.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb8,
    Luma8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb8 => 3,
            PixelLayout::Luma8 => 1,
        }
    }
}

/// Immutable frame. Pixel bytes are private; there is no `as_mut` or `DerefMut`.
pub struct Frame {
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,

    /// Wall-clock instant the frame was read from the source.
    pub captured_at: SystemTime,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("captured_at", &self.captured_at)
            .finish_non_exhaustive()
    }
}

impl Frame {
    /// Create a frame, validating the buffer length against the dimensions.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        layout: PixelLayout,
        captured_at: SystemTime,
    ) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(layout.channels()))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {} bytes for {}x{} {:?}, got {}",
                expected,
                width,
                height,
                layout,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            layout,
            captured_at,
        })
    }

    pub fn from_rgb_image(image: RgbImage, captured_at: SystemTime) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            layout: PixelLayout::Rgb8,
            captured_at,
        }
    }

    /// Decode a JPEG payload into an RGB frame.
    pub fn decode_jpeg(bytes: &[u8], captured_at: SystemTime) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode jpeg")?;
        Ok(Self::from_rgb_image(image.into_rgb8(), captured_at))
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn same_dimensions(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Single-intensity copy of the frame.
    pub fn to_luma(&self) -> GrayImage {
        match self.layout {
            PixelLayout::Luma8 => {
                GrayImage::from_fn(self.width, self.height, |x, y| {
                    image::Luma([self.data[(y * self.width + x) as usize]])
                })
            }
            PixelLayout::Rgb8 => imageops::grayscale(&self.to_rgb_image()),
        }
    }

    /// RGB copy of the frame, expanding luma when needed.
    pub fn to_rgb_image(&self) -> RgbImage {
        match self.layout {
            PixelLayout::Rgb8 => RgbImage::from_fn(self.width, self.height, |x, y| {
                let offset = ((y * self.width + x) * 3) as usize;
                image::Rgb([
                    self.data[offset],
                    self.data[offset + 1],
                    self.data[offset + 2],
                ])
            }),
            PixelLayout::Luma8 => RgbImage::from_fn(self.width, self.height, |x, y| {
                let v = self.data[(y * self.width + x) as usize];
                image::Rgb([v, v, v])
            }),
        }
    }

    /// Return a frame with the requested dimensions. No-op when they already match.
    pub fn resized(self, width: u32, height: u32) -> Frame {
        if self.width == width && self.height == height {
            return self;
        }
        let captured_at = self.captured_at;
        let resized = imageops::resize(&self.to_rgb_image(), width, height, FilterType::Triangle);
        Frame::from_rgb_image(resized, captured_at)
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let color = match self.layout {
            PixelLayout::Rgb8 => ExtendedColorType::Rgb8,
            PixelLayout::Luma8 => ExtendedColorType::L8,
        };
        encode_jpeg_raw(&self.data, self.width, self.height, color, quality)
    }
}

/// Encode an RGB image (e.g. an annotated copy of a frame) as JPEG.
pub fn encode_rgb_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let (width, height) = image.dimensions();
    encode_jpeg_raw(
        image.as_raw(),
        width,
        height,
        ExtendedColorType::Rgb8,
        quality,
    )
}

fn encode_jpeg_raw(
    data: &[u8],
    width: u32,
    height: u32,
    color: ExtendedColorType,
    quality: u8,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode(data, width, height, color)
        .context("encode jpeg")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_rgb(width: u32, height: u32, value: u8) -> Frame {
        Frame::new(
            vec![value; (width * height * 3) as usize],
            width,
            height,
            PixelLayout::Rgb8,
            SystemTime::UNIX_EPOCH,
        )
        .unwrap()
    }

    #[test]
    fn rejects_length_mismatch() {
        let result = Frame::new(vec![0u8; 10], 4, 4, PixelLayout::Rgb8, SystemTime::now());
        assert!(result.is_err());
    }

    #[test]
    fn luma_of_gray_rgb_is_identity() {
        let frame = solid_rgb(8, 4, 128);
        let luma = frame.to_luma();
        assert_eq!(luma.dimensions(), (8, 4));
        assert!(luma.pixels().all(|p| p.0[0] == 128));
    }

    #[test]
    fn resize_keeps_capture_time() {
        let frame = solid_rgb(64, 48, 10);
        let captured_at = frame.captured_at;
        let resized = frame.resized(32, 24);
        assert_eq!((resized.width, resized.height), (32, 24));
        assert_eq!(resized.captured_at, captured_at);
        assert_eq!(resized.pixels().len(), 32 * 24 * 3);
    }

    #[test]
    fn jpeg_encode_decode_keeps_dimensions() -> Result<()> {
        let frame = solid_rgb(40, 30, 200);
        let jpeg = frame.encode_jpeg(DEFAULT_JPEG_QUALITY)?;
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = Frame::decode_jpeg(&jpeg, SystemTime::UNIX_EPOCH)?;
        assert_eq!((decoded.width, decoded.height), (40, 30));
        assert_eq!(decoded.layout, PixelLayout::Rgb8);
        Ok(())
    }
}
