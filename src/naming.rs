//! Storage key derivation.
//!
//! Every conversion writes under one *base name*: the caller's hint reduced
//! to `[A-Za-z0-9_-]`, then `_<token>`. Keys are built from it:
//!
//! ```text
//! images/summer_trip_9f2c41d07a3b4e55.webp          primary
//! images/summer_trip_9f2c41d07a3b4e55_thumb.webp    sized ("thumb")
//! images/summer_trip_9f2c41d07a3b4e55.jpg           retained original
//! ```
//!
//! ## Tokens
//!
//! The token is what keeps two uploads of `photo.jpg` from overwriting each
//! other. It comes from a [`TokenSource`] so tests can pin it: with the same
//! hint and the same token, every function here returns the same keys.

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

/// Stem used when nothing survives sanitization.
const FALLBACK_STEM: &str = "image";

/// Reduce a caller-supplied stem to `[A-Za-z0-9_-]`.
///
/// Spaces become underscores; every other disallowed character is dropped.
///
/// - `"My Summer Trip"` → `"My_Summer_Trip"`
/// - `"café-menu (2)"` → `"caf-menu_2"`
/// - `"../../etc"` → `"etc"`
pub fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Strip the last extension from an upload's client filename.
///
/// - `"My Photo.JPG"` → `"My Photo"`
/// - `"archive.tar.gz"` → `"archive.tar"`
/// - `".hidden"` → `".hidden"`
pub fn file_stem(filename: &str) -> &str {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(pos) => &name[..pos],
    }
}

/// Last extension of a filename, without the dot.
pub fn file_extension(filename: &str) -> Option<&str> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(pos) => Some(&name[pos + 1..]),
    }
}

/// Base name shared by every key of one conversion.
pub fn base_name(hint: &str, token: &str) -> String {
    let stem = sanitize_stem(hint);
    let stem = if stem.is_empty() {
        FALLBACK_STEM
    } else {
        stem.as_str()
    };
    let token = sanitize_stem(token);
    if token.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}_{token}")
    }
}

fn join(directory: &str, file: &str) -> String {
    let directory = directory.trim_end_matches('/');
    if directory.is_empty() {
        file.to_string()
    } else {
        format!("{directory}/{file}")
    }
}

/// `directory/base_name.webp`
pub fn primary_key(directory: &str, base_name: &str) -> String {
    join(directory, &format!("{base_name}.webp"))
}

/// `directory/base_name_size.webp`
pub fn sized_key(directory: &str, base_name: &str, size_name: &str) -> String {
    join(directory, &format!("{base_name}_{size_name}.webp"))
}

/// `directory/base_name.ext` for the retained upload.
pub fn original_key(directory: &str, base_name: &str, extension: &str) -> String {
    join(directory, &format!("{base_name}.{extension}"))
}

/// SHA-256 of the source bytes as lowercase hex.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Supplies the uniqueness suffix for a base name.
pub trait TokenSource {
    fn next_token(&self) -> String;
}

/// Random 64-bit token (16 hex chars) from a v4 UUID. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomToken;

impl TokenSource for RandomToken {
    fn next_token(&self) -> String {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        simple[..16].to_string()
    }
}

/// Monotonic counter with a fixed prefix: `p1`, `p2`, ...
///
/// Unique within one process only. Useful when keys should sort by
/// conversion order.
#[derive(Debug, Default)]
pub struct SequenceToken {
    prefix: String,
    next: AtomicU64,
}

impl SequenceToken {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl TokenSource for SequenceToken {
    fn next_token(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.prefix, n)
    }
}

/// Always the same token. Makes key derivation reproducible in tests.
#[derive(Debug, Clone)]
pub struct FixedToken(pub String);

impl TokenSource for FixedToken {
    fn next_token(&self) -> String {
        self.0.clone()
    }
}
