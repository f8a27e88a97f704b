//! CLI output formatting.
//!
//! Every display has a `format_*` function returning lines (pure, tested)
//! and a `print_*` wrapper that writes them to stdout. Failure lines go to
//! stderr, so `convert --json` output is nothing but the JSON array.
//!
//! ## Convert
//!
//! ```text
//! 001 Beach Day.jpg → Beach_Day_9f2c41d07a3b4e55
//!     canonical  1000x800  84.2 KB → /storage/images/Beach_Day_9f2c41d07a3b4e55.webp
//!     thumbnail  150x120   4.1 KB → /storage/images/Beach_Day_9f2c41d07a3b4e55_thumbnail.webp
//!     original → /storage/images/Beach_Day_9f2c41d07a3b4e55.jpg
//! ```
//!
//! ## Check
//!
//! ```text
//! Policy
//!     quality: 80
//!     keep original: yes
//!     formats: jpeg, png
//!     sizes: thumbnail=150, medium=500, large=1200
//! Storage
//!     root: public
//!     base url: /storage
//! Workers: 8
//! ```

use crate::config::{Config, effective_threads};
use crate::store::BlobStore;
use crate::types::Manifest;

// ============================================================================
// Helpers
// ============================================================================

fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Human-readable byte size: `512 B`, `4.1 KB`, `1.3 MB`.
fn format_size(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / (KB * KB))
    }
}

// ============================================================================
// Convert
// ============================================================================

/// Lines for one committed conversion.
///
/// `index` is 1-based position among the files of this run.
pub fn format_manifest(
    index: usize,
    source: &str,
    manifest: &Manifest,
    store: &dyn BlobStore,
) -> Vec<String> {
    let mut lines = vec![format!(
        "{} {} \u{2192} {}",
        format_index(index),
        source,
        manifest.base_name
    )];

    let name_width = manifest
        .entries
        .iter()
        .map(|e| e.name.len())
        .max()
        .unwrap_or(0);
    let dims: Vec<String> = manifest
        .entries
        .iter()
        .map(|e| format!("{}x{}", e.width, e.height))
        .collect();
    let dims_width = dims.iter().map(String::len).max().unwrap_or(0);

    for (entry, dim) in manifest.entries.iter().zip(&dims) {
        lines.push(format!(
            "    {:<nw$}  {:<dw$}  {} \u{2192} {}",
            entry.name,
            dim,
            format_size(entry.size),
            store.url(&entry.key),
            nw = name_width,
            dw = dims_width,
        ));
    }
    if let Some(original) = &manifest.original {
        lines.push(format!("    original \u{2192} {}", store.url(original)));
    }
    lines
}

pub fn print_manifest(index: usize, source: &str, manifest: &Manifest, store: &dyn BlobStore) {
    for line in format_manifest(index, source, manifest, store) {
        println!("{}", line);
    }
}

/// Lines for a file that failed to convert, one per link of the source chain.
pub fn format_failure(index: usize, source: &str, error: &dyn std::error::Error) -> Vec<String> {
    let mut lines = vec![
        format!("{} {} \u{2192} failed", format_index(index), source),
        format!("    Error: {}", error),
    ];
    let mut cause = error.source();
    while let Some(e) = cause {
        lines.push(format!("    Caused by: {}", e));
        cause = e.source();
    }
    lines
}

/// Failures go to stderr so `convert --json` keeps stdout parseable.
pub fn print_failure(index: usize, source: &str, error: &dyn std::error::Error) {
    for line in format_failure(index, source, error) {
        eprintln!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

/// Summary of the effective configuration.
pub fn format_config(config: &Config) -> Vec<String> {
    let policy = &config.webp;
    let formats: Vec<&str> = policy.allowed_formats.iter().map(|f| f.as_str()).collect();
    let sizes: Vec<String> = policy
        .sizes
        .iter()
        .map(|s| format!("{}={}", s.name, s.width))
        .collect();

    vec![
        "Policy".to_string(),
        format!("    quality: {}", policy.quality),
        format!(
            "    keep original: {}",
            if policy.keep_original { "yes" } else { "no" }
        ),
        format!("    formats: {}", formats.join(", ")),
        if sizes.is_empty() {
            "    sizes: (canonical only)".to_string()
        } else {
            format!("    sizes: {}", sizes.join(", "))
        },
        "Storage".to_string(),
        format!("    root: {}", config.storage.root),
        format!("    base url: {}", config.storage.base_url),
        format!("Workers: {}", effective_threads(&config.processing)),
    ]
}

pub fn print_config(config: &Config) {
    for line in format_config(config) {
        println!("{}", line);
    }
}
