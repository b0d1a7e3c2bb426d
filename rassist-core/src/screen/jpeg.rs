//! JPEG frame codec backed by the `image` crate.

use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;

use crate::error::RassistError;
use crate::protocol::clamp_quality;
use crate::screen::{Bitmap, ImageCodec};

/// Baseline JPEG encoder/decoder. Quality maps 1:1 onto JPEG quality.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

impl JpegCodec {
    pub fn new() -> Self {
        Self
    }
}

impl ImageCodec for JpegCodec {
    fn encode(&self, bitmap: &Bitmap, quality: u8) -> Result<Vec<u8>, RassistError> {
        let rgb = bitmap.to_rgb();
        let mut out = Vec::with_capacity(bitmap.width as usize * bitmap.height as usize / 4);
        let mut encoder = JpegEncoder::new_with_quality(&mut out, clamp_quality(quality));
        encoder.encode_image(&rgb)?;
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Bitmap, RassistError> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;
        Ok(Bitmap::from_rgb(image.to_rgb8()))
    }
}
