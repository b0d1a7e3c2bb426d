//! Raw bitmap representation passed between capture, encode and display.

use std::time::Instant;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::error::RassistError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for raw bitmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha (DXGI default).
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

// ── Bitmap ───────────────────────────────────────────────────────

/// An uncompressed image: a captured screen or a decoded frame.
///
/// The `data` buffer holds `height` rows of `stride` bytes each.
/// `stride` may be larger than `width * bytes_per_pixel` due to
/// GPU row alignment.
#[derive(Debug, Clone)]
pub struct Bitmap {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row pitch in **bytes** (may exceed `width * bpp`).
    pub stride: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Raw pixel data, `stride * height` bytes.
    pub data: Vec<u8>,
    /// Monotonic capture/decode timestamp.
    pub timestamp: Instant,
}

impl Bitmap {
    /// Build a tightly packed bitmap, checking the buffer size.
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, RassistError> {
        let stride = width * format.bytes_per_pixel() as u32;
        Self::with_stride(width, height, stride, format, data)
    }

    /// Build a bitmap with an explicit row pitch.
    pub fn with_stride(
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, RassistError> {
        if width == 0 || height == 0 {
            return Err(RassistError::Image(format!(
                "empty bitmap {width}x{height}"
            )));
        }
        let min_stride = width as usize * format.bytes_per_pixel();
        let needed = stride as usize * height as usize;
        if (stride as usize) < min_stride || data.len() < needed {
            return Err(RassistError::Image(format!(
                "bitmap buffer too small: {} bytes for {width}x{height} stride {stride}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            stride,
            format,
            data,
            timestamp: Instant::now(),
        })
    }

    /// Wrap an `image` RGB buffer.
    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            stride: width * 3,
            format: PixelFormat::Rgb8,
            data: image.into_raw(),
            timestamp: Instant::now(),
        }
    }

    /// Returns the pixel bytes at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = self.format.bytes_per_pixel();
        let offset = y as usize * self.stride as usize + x as usize * bpp;
        &self.data[offset..offset + bpp]
    }

    /// Convert to a packed RGB image, dropping alpha and row padding.
    pub fn to_rgb(&self) -> RgbImage {
        let format = self.format;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let p = self.pixel(x, y);
            match format {
                PixelFormat::Bgra8 => Rgb([p[2], p[1], p[0]]),
                PixelFormat::Rgba8 | PixelFormat::Rgb8 => Rgb([p[0], p[1], p[2]]),
            }
        })
    }

    /// Resample to exactly `width` x `height` RGB, regardless of the
    /// source size or aspect ratio.
    pub fn resample(&self, width: u32, height: u32) -> Bitmap {
        if self.width == width && self.height == height && self.format == PixelFormat::Rgb8 {
            return self.clone();
        }
        let rgb = self.to_rgb();
        let scaled = if self.width == width && self.height == height {
            rgb
        } else {
            imageops::resize(&rgb, width, height, FilterType::Triangle)
        };
        let mut out = Bitmap::from_rgb(scaled);
        out.timestamp = self.timestamp;
        out
    }
}

// ── Tests ────────────────────────────────────────────────────────
