//! Shared test utilities for the webpify test suite.
//!
//! Fixtures are synthesized in memory with the `image` crate's encoders, so
//! no binary files live in the repository. The test doubles wrap the real
//! codec and store and fail on demand:
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let store = FlakyStore::failing_put(3);          // third write fails
//! let codec = FailingCodec::at_width(500);         // "medium" encode fails
//! let source = jpeg_source(1000, 800);
//! ```

use crate::imaging::{Codec, CodecError, Quality, RasterImage, WebpCodec};
use crate::pipeline::CancelFlag;
use crate::store::{BlobStore, MemoryStore, StoreError};
use crate::types::{SourceFormat, SourceImage};
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage, Rgba, RgbaImage};
use std::sync::atomic::{AtomicUsize, Ordering};

// =========================================================================
// Fixture images
// =========================================================================

/// A gradient JPEG with the given dimensions.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new(&mut out)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    out
}

/// An RGBA PNG: left half fully transparent, right half opaque.
pub fn png_rgba_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, _| {
        let alpha = if x < width / 2 { 0 } else { 255 };
        Rgba([200, 40, 40, alpha])
    });
    let mut out = Vec::new();
    image::codecs::png::PngEncoder::new(&mut out)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgba8)
        .unwrap();
    out
}

pub fn jpeg_source(width: u32, height: u32) -> SourceImage {
    SourceImage::new(jpeg_bytes(width, height), SourceFormat::Jpeg)
}

pub fn png_source(width: u32, height: u32) -> SourceImage {
    SourceImage::new(png_rgba_bytes(width, height), SourceFormat::Png)
}

/// Decode a stored WebP blob and return its dimensions.
pub fn webp_dimensions(bytes: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory_with_format(bytes, image::ImageFormat::WebP).unwrap();
    (img.width(), img.height())
}

// =========================================================================
// Codec double
// =========================================================================

/// Real codec that fails to encode any raster of one particular width.
pub struct FailingCodec {
    fail_width: u32,
    pub encodes: AtomicUsize,
    pub decodes: AtomicUsize,
}

impl FailingCodec {
    pub fn at_width(fail_width: u32) -> Self {
        Self {
            fail_width,
            encodes: AtomicUsize::new(0),
            decodes: AtomicUsize::new(0),
        }
    }
}

impl Codec for FailingCodec {
    fn decode(&self, bytes: &[u8], format: SourceFormat) -> Result<RasterImage, CodecError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        WebpCodec.decode(bytes, format)
    }

    fn encode_webp(&self, raster: &RasterImage, quality: Quality) -> Result<Vec<u8>, CodecError> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        if raster.width() == self.fail_width {
            return Err(CodecError::EncodeFailure(format!(
                "injected failure at width {}",
                self.fail_width
            )));
        }
        WebpCodec.encode_webp(raster, quality)
    }
}

// =========================================================================
// Store double
// =========================================================================

/// Memory store that can fail its Nth `put`, refuse deletes, or trip a
/// cancel flag on its Nth `put`.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_put: Option<usize>,
    fail_deletes: bool,
    cancel_on_put: Option<(usize, CancelFlag)>,
    puts: AtomicUsize,
}

impl FlakyStore {
    /// The `n`th put (1-based) fails; earlier ones succeed.
    pub fn failing_put(n: usize) -> Self {
        Self {
            fail_put: Some(n),
            ..Self::default()
        }
    }

    pub fn refusing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    /// Cancel `flag` right after the `n`th put succeeds.
    pub fn cancelling_after(n: usize, flag: CancelFlag) -> Self {
        Self {
            cancel_on_put: Some((n, flag)),
            ..Self::default()
        }
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl BlobStore for FlakyStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_put == Some(n) {
            return Err(StoreError::Rejected {
                key: key.to_string(),
                reason: format!("injected failure on put #{n}"),
            });
        }
        self.inner.put(key, bytes)?;
        if let Some((at, flag)) = &self.cancel_on_put
            && *at == n
        {
            flag.cancel();
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.inner.exists(key)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_deletes {
            return Err(StoreError::Rejected {
                key: key.to_string(),
                reason: "deletes disabled".into(),
            });
        }
        self.inner.delete(key)
    }

    fn url(&self, key: &str) -> String {
        self.inner.url(key)
    }
}
