//! Decoded pixel buffers.

use image::DynamicImage;

/// An 8-bit RGB or RGBA pixel buffer.
///
/// Decoding normalizes every source into one of those two layouts so the
/// resampler and encoder only ever see two cases. Dropping the value frees
/// the buffer, including on early-return error paths.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    image: DynamicImage,
}

impl RasterImage {
    /// Normalize a decoded image: RGBA8 when it carries alpha, RGB8 otherwise.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        let image = match image {
            DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image,
            other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn has_alpha(&self) -> bool {
        matches!(self.image, DynamicImage::ImageRgba8(_))
    }

    /// Interleaved pixel bytes: 3 per pixel, or 4 when [`has_alpha`](Self::has_alpha).
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_bytes()
    }

    pub(crate) fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }
}
