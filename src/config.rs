//! Conversion policy and configuration file loading.
//!
//! The pipeline never reads configuration itself. Callers build a [`Policy`]
//! (in code, or from a file via [`load_config`]) and pass it into every
//! conversion. Nothing here is global.
//!
//! ## Config File
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [webp]
//! quality = 80                         # WebP quality (0-100)
//! keep_original = true                 # Also store the uploaded bytes
//! allowed_formats = ["jpeg", "png"]    # Declared formats accepted for conversion
//!
//! [[webp.sizes]]                       # Sized derivatives, in output order
//! name = "thumbnail"
//! width = 150
//!
//! [[webp.sizes]]
//! name = "medium"
//! width = 500
//!
//! [[webp.sizes]]
//! name = "large"
//! width = 1200
//!
//! [processing]
//! max_processes = 4                    # Max parallel workers (omit for auto = CPU cores)
//!
//! [storage]
//! root = "public"                      # Directory the CLI writes blobs into
//! base_url = "/storage"                # Prefix for public URLs
//! ```
//!
//! ## Partial Configuration
//!
//! Files are sparse: user values are merged over the stock defaults. Tables
//! merge key by key; arrays replace wholesale, so a `[[webp.sizes]]` list in
//! the file is the complete size list.
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::Quality;
use crate::types::{CANONICAL, DerivativeSpec, SourceFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Config file looked up by the CLI when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "webp.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// One sized derivative: a name unique within the policy and a target width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizeSpec {
    pub name: String,
    pub width: u32,
}

impl SizeSpec {
    pub fn new(name: impl Into<String>, width: u32) -> Self {
        Self {
            name: name.into(),
            width,
        }
    }
}

/// What a conversion produces and what it accepts.
///
/// Immutable from the pipeline's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Policy {
    /// Lossy WebP quality, 0 (worst) to 100 (best).
    pub quality: u32,
    /// Store the submitted bytes alongside the derivatives.
    pub keep_original: bool,
    /// Sized derivatives in output order. The canonical derivative is implicit.
    pub sizes: Vec<SizeSpec>,
    /// Declared formats accepted for conversion.
    pub allowed_formats: Vec<SourceFormat>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            quality: 80,
            keep_original: true,
            sizes: vec![
                SizeSpec::new("thumbnail", 150),
                SizeSpec::new("medium", 500),
                SizeSpec::new("large", 1200),
            ],
            allowed_formats: vec![SourceFormat::Jpeg, SourceFormat::Png],
        }
    }
}

impl Policy {
    pub fn with_quality(mut self, quality: u32) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_keep_original(mut self, keep: bool) -> Self {
        self.keep_original = keep;
        self
    }

    /// Replace the size table.
    pub fn with_sizes<N: Into<String>>(mut self, sizes: impl IntoIterator<Item = (N, u32)>) -> Self {
        self.sizes = sizes
            .into_iter()
            .map(|(name, width)| SizeSpec::new(name, width))
            .collect();
        self
    }

    pub fn with_allowed_formats(mut self, formats: impl IntoIterator<Item = SourceFormat>) -> Self {
        self.allowed_formats = formats.into_iter().collect();
        self
    }

    pub fn encode_quality(&self) -> Quality {
        Quality::new(self.quality)
    }

    pub fn allows(&self, format: SourceFormat) -> bool {
        self.allowed_formats.contains(&format)
    }

    /// The full derivative set: canonical first, then sizes in order.
    pub fn derivative_specs(&self) -> Vec<DerivativeSpec> {
        std::iter::once(DerivativeSpec::canonical())
            .chain(
                self.sizes
                    .iter()
                    .map(|s| DerivativeSpec::sized(s.name.clone(), s.width)),
            )
            .collect()
    }

    /// Validate values are within acceptable ranges and size names are usable keys.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quality > 100 {
            return Err(ConfigError::Validation("webp.quality must be 0-100".into()));
        }
        if self.allowed_formats.is_empty() {
            return Err(ConfigError::Validation(
                "webp.allowed_formats must not be empty".into(),
            ));
        }
        let mut seen = HashSet::new();
        for size in &self.sizes {
            if size.width == 0 {
                return Err(ConfigError::Validation(format!(
                    "webp.sizes: width for '{}' must be greater than 0",
                    size.name
                )));
            }
            if size.name.is_empty()
                || !size
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(ConfigError::Validation(format!(
                    "webp.sizes: name '{}' must be non-empty and use only A-Z, a-z, 0-9, '-' or '_'",
                    size.name
                )));
            }
            if size.name == CANONICAL {
                return Err(ConfigError::Validation(format!(
                    "webp.sizes: '{CANONICAL}' is reserved for the unscaled image"
                )));
            }
            if !seen.insert(size.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "webp.sizes: duplicate size name '{}'",
                    size.name
                )));
            }
        }
        Ok(())
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel encode workers per conversion.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)`, at least 1
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Where the CLI's filesystem store lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub root: String,
    pub base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "public".to_string(),
            base_url: "/storage".to_string(),
        }
    }
}

/// Everything a config file can hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub webp: Policy,
    pub processing: ProcessingConfig,
    pub storage: StorageConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.webp.validate()?;
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Config::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Parse config text, merge it over the defaults, and validate.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let overlay: toml::Value = toml::from_str(content)?;
    let merged = merge_toml(stock_defaults_value()?, overlay);
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load a config file.
///
/// A missing file yields the validated defaults; an unreadable or invalid
/// one is an error.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Returns a fully-commented stock config file with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# webpify configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.

# ---------------------------------------------------------------------------
# Conversion policy
# ---------------------------------------------------------------------------
[webp]
# Lossy WebP quality (0 = worst, 100 = best). Alpha is always kept lossless.
quality = 80

# Store the uploaded bytes next to the WebP derivatives.
keep_original = true

# Declared source formats accepted for conversion ("jpg" uploads count as jpeg).
allowed_formats = ["jpeg", "png"]

# Sized derivatives, generated in addition to the unscaled WebP. Height follows
# the source aspect ratio. Names end up in keys: <base>_<name>.webp.
# Listing any [[webp.sizes]] replaces the whole default list.
[[webp.sizes]]
name = "thumbnail"
width = 150

[[webp.sizes]]
name = "medium"
width = 500

[[webp.sizes]]
name = "large"
width = 1200

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel encode workers per conversion.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# ---------------------------------------------------------------------------
# Storage (command-line tool only)
# ---------------------------------------------------------------------------
[storage]
# Directory blobs are written into.
root = "public"

# Prefix used to build public URLs for stored keys.
base_url = "/storage"
"##
}
