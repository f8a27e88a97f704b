//! End-to-end conversions through the public API.

use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage, Rgba, RgbaImage};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use webpify::{
    BlobStore, Codec, CodecError, FixedToken, FsStore, MemoryStore, Pipeline, PipelineError,
    Policy, Quality, SequenceToken, SourceFormat, SourceImage, StoreError, ValidationError,
    WebpCodec,
};

fn jpeg(width: u32, height: u32) -> SourceImage {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new(&mut out)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    SourceImage::new(out, SourceFormat::Jpeg)
}

fn transparent_png(width: u32, height: u32) -> SourceImage {
    let img = RgbaImage::from_fn(width, height, |x, _| {
        Rgba([10, 200, 10, if x < width / 2 { 0 } else { 255 }])
    });
    let mut out = Vec::new();
    image::codecs::png::PngEncoder::new(&mut out)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgba8)
        .unwrap();
    SourceImage::new(out, SourceFormat::Png)
}

fn decode_webp(bytes: &[u8]) -> image::DynamicImage {
    image::load_from_memory_with_format(bytes, image::ImageFormat::WebP).unwrap()
}

/// Fails encoding at one width.
struct BrokenAt(u32, AtomicUsize);

impl Codec for BrokenAt {
    fn decode(&self, bytes: &[u8], format: SourceFormat) -> Result<webpify::imaging::RasterImage, CodecError> {
        WebpCodec.decode(bytes, format)
    }

    fn encode_webp(
        &self,
        raster: &webpify::imaging::RasterImage,
        quality: Quality,
    ) -> Result<Vec<u8>, CodecError> {
        self.1.fetch_add(1, Ordering::SeqCst);
        if raster.width() == self.0 {
            return Err(CodecError::EncodeFailure("boom".into()));
        }
        WebpCodec.encode_webp(raster, quality)
    }
}

/// Fails the Nth put.
struct NthPutFails {
    inner: MemoryStore,
    n: usize,
    puts: AtomicUsize,
}

impl BlobStore for NthPutFails {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if self.puts.fetch_add(1, Ordering::SeqCst) + 1 == self.n {
            return Err(StoreError::Rejected {
                key: key.into(),
                reason: "quota".into(),
            });
        }
        self.inner.put(key, bytes)
    }
    fn exists(&self, key: &str) -> bool {
        self.inner.exists(key)
    }
    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key)
    }
    fn url(&self, key: &str) -> String {
        self.inner.url(key)
    }
}

// =========================================================================
// Happy path
// =========================================================================

#[test]
fn jpeg_becomes_canonical_plus_two_sizes() {
    let store = MemoryStore::new();
    let policy = Policy::default()
        .with_keep_original(false)
        .with_sizes([("thumb", 150), ("large", 1200)]);

    let manifest = webpify::convert(&store, &jpeg(1000, 800), "images", "photo", &policy).unwrap();

    assert_eq!(manifest.entries.len(), 3);
    assert_eq!(store.len(), 3);

    let canonical = store.get(manifest.canonical_key().unwrap()).unwrap();
    let img = decode_webp(&canonical);
    assert_eq!((img.width(), img.height()), (1000, 800));

    let thumb = decode_webp(&store.get(manifest.key("thumb").unwrap()).unwrap());
    assert_eq!((thumb.width(), thumb.height()), (150, 120));

    // upscaled, not clamped
    let large = decode_webp(&store.get(manifest.key("large").unwrap()).unwrap());
    assert_eq!((large.width(), large.height()), (1200, 960));

    assert!(manifest.base_name.starts_with("photo_"));
    for key in manifest.all_keys() {
        assert!(key.starts_with("images/photo_") && key.ends_with(".webp"));
    }
}

#[test]
fn png_alpha_survives() {
    let store = MemoryStore::new();
    let policy = Policy::default()
        .with_keep_original(false)
        .with_sizes([("half", 32)]);
    let manifest = webpify::convert(&store, &transparent_png(64, 64), "d", "logo", &policy).unwrap();

    for entry in &manifest.entries {
        let img = decode_webp(&store.get(&entry.key).unwrap()).to_rgba8();
        let left = img.get_pixel(1, img.height() / 2)[3];
        let right = img.get_pixel(img.width() - 2, img.height() / 2)[3];
        assert!(left < 16, "{}: left alpha {left}", entry.name);
        assert!(right > 240, "{}: right alpha {right}", entry.name);
    }
}

#[test]
fn retained_original_is_byte_identical() {
    let store = MemoryStore::new();
    let source = jpeg(40, 30);
    let manifest = webpify::convert(&store, &source, "up", "x", &Policy::default()).unwrap();
    let original = manifest.original.as_deref().unwrap();
    assert!(original.ends_with(".jpg"));
    assert_eq!(store.get(original).unwrap(), source.bytes());
    // original + canonical + thumbnail/medium/large
    assert_eq!(store.len(), 5);
}

#[test]
fn fixed_token_is_deterministic_and_distinct_tokens_are_disjoint() {
    let policy = Policy::default().with_keep_original(false);
    let source = jpeg(200, 100);

    let token = FixedToken("abc".into());
    let a = MemoryStore::new();
    let b = MemoryStore::new();
    let ma = Pipeline::new(&a).with_tokens(&token).convert(&source, "d", "Pic", &policy).unwrap();
    let mb = Pipeline::new(&b).with_tokens(&token).convert(&source, "d", "Pic", &policy).unwrap();
    assert_eq!(ma.all_keys(), mb.all_keys());

    let shared = MemoryStore::new();
    let seq = SequenceToken::new("n");
    let first = Pipeline::new(&shared).with_tokens(&seq).convert(&source, "d", "Pic", &policy).unwrap();
    let second = Pipeline::new(&shared).with_tokens(&seq).convert(&source, "d", "Pic", &policy).unwrap();
    for key in first.all_keys() {
        assert!(!second.all_keys().contains(&key));
    }
    assert_eq!(shared.len(), first.all_keys().len() + second.all_keys().len());
}

// =========================================================================
// Failures leave nothing behind
// =========================================================================

#[test]
fn gif_is_rejected_without_touching_the_store() {
    let store = MemoryStore::new();
    let gif = SourceImage::new(b"GIF89a\x01\x00\x01\x00".to_vec(), SourceFormat::Gif);
    let err = webpify::convert(&store, &gif, "d", "x", &Policy::default()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Validation(ValidationError::UnsupportedFormat(_))
    ));
    assert!(store.is_empty());
}

#[test]
fn third_of_four_derivatives_failing_commits_nothing() {
    let store = MemoryStore::new();
    let codec = BrokenAt(500, AtomicUsize::new(0));
    let policy = Policy::default().with_keep_original(false);

    let err = Pipeline::new(&store)
        .with_codec(&codec)
        .convert(&jpeg(1000, 800), "d", "x", &policy)
        .unwrap_err();

    assert!(matches!(err, PipelineError::DerivativeFailed { ref name, .. } if name == "medium"));
    assert_eq!(codec.1.load(Ordering::SeqCst), 4);
    assert!(store.is_empty());
}

#[test]
fn failed_write_restores_the_prior_store_state() {
    for n in 1..=4 {
        let store = NthPutFails {
            inner: MemoryStore::new(),
            n,
            puts: AtomicUsize::new(0),
        };
        store.inner.put("d/other_upload.webp", b"other").unwrap();
        store.inner.put("elsewhere/x.png", b"png").unwrap();
        let before = store.inner.keys();

        let err = webpify::convert(&store, &jpeg(300, 200), "d", "x", &Policy::default()).unwrap_err();
        assert!(
            matches!(err, PipelineError::StoreFailure { rollback_incomplete: false, .. }),
            "put #{n}: {err}"
        );
        assert_eq!(store.inner.keys(), before, "put #{n}");
        assert_eq!(store.inner.get("d/other_upload.webp").unwrap(), b"other");
    }
}

// =========================================================================
// Filesystem store
// =========================================================================

#[test]
fn fs_store_writes_only_final_files() {
    let tmp = TempDir::new().unwrap();
    let store = FsStore::new(tmp.path(), "/storage");
    let token = FixedToken("fs".into());
    let policy = Policy::default().with_sizes([("small", 20)]);

    let manifest = Pipeline::new(&store)
        .with_tokens(&token)
        .convert(&jpeg(50, 50), "posts/cover", "My Pic", &policy)
        .unwrap();

    let mut names: Vec<String> = fs::read_dir(tmp.path().join("posts/cover"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec!["My_Pic_fs.jpg", "My_Pic_fs.webp", "My_Pic_fs_small.webp"]
    );
    assert_eq!(
        store.url(manifest.canonical_key().unwrap()),
        "/storage/posts/cover/My_Pic_fs.webp"
    );
}
