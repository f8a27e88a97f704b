//! Shared types passed between the caller, the pipeline, and the hook layer.
//!
//! [`SourceImage`] goes in, [`Manifest`] comes out. [`DerivativeSpec`] is the
//! unit of fan-out work in between.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the unscaled derivative in every [`Manifest`].
pub const CANONICAL: &str = "canonical";

/// Declared format of a submitted image.
///
/// The tag is what the caller *claims* the bytes are. Whether it is allowed
/// is a policy decision; whether it can be decoded is a codec decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Tiff,
}

impl SourceFormat {
    /// Map a file extension (case-insensitive, no dot) to a format tag.
    ///
    /// ```
    /// # use webpify::types::SourceFormat;
    /// assert_eq!(SourceFormat::from_extension("JPG"), Some(SourceFormat::Jpeg));
    /// assert_eq!(SourceFormat::from_extension("heic"), None);
    /// ```
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            _ => None,
        }
    }

    /// Canonical file extension, used for the retained original's key.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw uploaded bytes plus the declared format.
///
/// Immutable once built. The pipeline borrows it for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    bytes: Vec<u8>,
    format: SourceFormat,
}

impl SourceImage {
    pub fn new(bytes: Vec<u8>, format: SourceFormat) -> Self {
        Self { bytes, format }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One derivative to produce. `target_width = None` is the canonical one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivativeSpec {
    pub name: String,
    pub target_width: Option<u32>,
}

impl DerivativeSpec {
    pub fn canonical() -> Self {
        Self {
            name: CANONICAL.to_string(),
            target_width: None,
        }
    }

    pub fn sized(name: impl Into<String>, width: u32) -> Self {
        Self {
            name: name.into(),
            target_width: Some(width),
        }
    }

    pub fn is_canonical(&self) -> bool {
        self.target_width.is_none()
    }
}

/// A committed derivative: where it lives and what it looks like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativeEntry {
    pub name: String,
    pub key: String,
    pub width: u32,
    pub height: u32,
    /// Encoded size in bytes.
    pub size: usize,
}

/// Result of a successful conversion.
///
/// Entries are ordered: canonical first, then sizes in policy declaration
/// order. Every key listed here was written to the store before the manifest
/// was returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Sanitized stem plus uniqueness token, shared by every key.
    pub base_name: String,
    /// SHA-256 of the source bytes, lowercase hex.
    pub fingerprint: String,
    pub entries: Vec<DerivativeEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
}

impl Manifest {
    /// Key of the unscaled WebP.
    pub fn canonical_key(&self) -> Option<&str> {
        self.key(CANONICAL)
    }

    /// Key for a derivative by name.
    pub fn key(&self, name: &str) -> Option<&str> {
        self.entry(name).map(|e| e.key.as_str())
    }

    pub fn entry(&self, name: &str) -> Option<&DerivativeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Sized derivatives only, in declaration order.
    pub fn sizes(&self) -> impl Iterator<Item = &DerivativeEntry> {
        self.entries.iter().filter(|e| e.name != CANONICAL)
    }

    /// Every key the conversion wrote, original first when retained.
    pub fn all_keys(&self) -> Vec<&str> {
        self.original
            .as_deref()
            .into_iter()
            .chain(self.entries.iter().map(|e| e.key.as_str()))
            .collect()
    }
}
