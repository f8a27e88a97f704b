//! Decode and encode, no I/O.
//!
//! The [`Codec`] trait is the seam between the pipeline and the pixel
//! libraries. [`WebpCodec`] is the production implementation:
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode JPEG, PNG | `image::load_from_memory_with_format` |
//! | Encode → WebP | `webp::Encoder::encode_simple` (lossy color, lossless alpha plane) |
//!
//! Tests swap in codecs that fail on demand to exercise the all-or-nothing
//! paths of the pipeline.

use super::params::Quality;
use super::raster::RasterImage;
use crate::types::SourceFormat;
use image::ImageFormat;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("no decoder for format: {0}")]
    UnsupportedFormat(SourceFormat),
    #[error("input is not a valid {format} image: {reason}")]
    CorruptInput {
        format: SourceFormat,
        reason: String,
    },
    #[error("WebP encode failed: {0}")]
    EncodeFailure(String),
}

/// Decoder/encoder pair used by the pipeline.
///
/// Implementations must be `Sync`: one decoded raster is encoded from
/// several worker threads at once.
pub trait Codec: Sync {
    /// Decode `bytes` as the declared `format`.
    fn decode(&self, bytes: &[u8], format: SourceFormat) -> Result<RasterImage, CodecError>;

    /// Encode a raster to a WebP container.
    fn encode_webp(&self, raster: &RasterImage, quality: Quality) -> Result<Vec<u8>, CodecError>;
}

/// Production codec: `image` decoders, libwebp encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebpCodec;

impl WebpCodec {
    pub fn new() -> Self {
        Self
    }
}

/// Decoders compiled in, keyed by declared format.
fn image_format(format: SourceFormat) -> Option<ImageFormat> {
    match format {
        SourceFormat::Jpeg => Some(ImageFormat::Jpeg),
        SourceFormat::Png => Some(ImageFormat::Png),
        _ => None,
    }
}

impl Codec for WebpCodec {
    fn decode(&self, bytes: &[u8], format: SourceFormat) -> Result<RasterImage, CodecError> {
        let image_format = image_format(format).ok_or(CodecError::UnsupportedFormat(format))?;
        let image = image::load_from_memory_with_format(bytes, image_format).map_err(|e| {
            CodecError::CorruptInput {
                format,
                reason: e.to_string(),
            }
        })?;
        Ok(RasterImage::from_dynamic(image))
    }

    fn encode_webp(&self, raster: &RasterImage, quality: Quality) -> Result<Vec<u8>, CodecError> {
        let (width, height) = raster.dimensions();
        let encoder = if raster.has_alpha() {
            webp::Encoder::from_rgba(raster.as_bytes(), width, height)
        } else {
            webp::Encoder::from_rgb(raster.as_bytes(), width, height)
        };
        let memory = encoder
            .encode_simple(false, quality.as_factor())
            .map_err(|e| CodecError::EncodeFailure(format!("{e:?} ({width}x{height})")))?;
        Ok(memory.to_vec())
    }
}
