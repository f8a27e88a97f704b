//! Attribute-level integration: convert uploads before a record is saved.
//!
//! A record type declares which of its attributes hold images with an
//! [`ImageFields`] value. The persistence layer calls [`before_persist`] for
//! each attribute it is about to write. Uploads on listed attributes are run
//! through the pipeline and replaced by the canonical key; mapped size
//! columns receive the sized keys:
//!
//! ```text
//! posts.cover = <upload "Beach Day.jpg">
//!   → posts.cover       = "posts/cover/Beach_Day_9f2c41d07a3b4e55.webp"
//!     posts.cover_thumb = "posts/cover/Beach_Day_9f2c41d07a3b4e55_thumbnail.webp"
//! ```
//!
//! Anything else (a stored key, an unlisted attribute) passes through
//! untouched. Reading back is [`url_for`].

use crate::config::Policy;
use crate::naming;
use crate::pipeline::{Pipeline, PipelineError, ValidationError};
use crate::store::BlobStore;
use crate::types::{SourceFormat, SourceImage};
use std::collections::{BTreeMap, HashMap};

/// A file submitted with a request, not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Client-side filename. Only its stem and extension are used.
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// Format declared by the filename's extension.
    pub fn format(&self) -> Option<SourceFormat> {
        naming::file_extension(&self.filename).and_then(SourceFormat::from_extension)
    }

    /// Base name hint derived from the filename.
    pub fn hint(&self) -> &str {
        naming::file_stem(&self.filename)
    }

    pub fn to_source(&self) -> Result<SourceImage, ValidationError> {
        let format = self.format().ok_or_else(|| {
            ValidationError::UnsupportedFormat(
                naming::file_extension(&self.filename)
                    .unwrap_or_default()
                    .to_ascii_lowercase(),
            )
        })?;
        Ok(SourceImage::new(self.bytes.clone(), format))
    }
}

/// Value about to be written to an attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Upload(Upload),
    Stored(String),
}

/// Which attributes of a record hold images, and where their files go.
#[derive(Debug, Clone, Default)]
pub struct ImageFields {
    table: String,
    fields: Vec<String>,
    directories: BTreeMap<String, String>,
    /// attribute → [(size name, column)]
    size_columns: BTreeMap<String, Vec<(String, String)>>,
}

impl ImageFields {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn field(mut self, attribute: impl Into<String>) -> Self {
        self.fields.push(attribute.into());
        self
    }

    /// Store this attribute's files under `directory` instead of `<table>/<attribute>`.
    pub fn with_directory(mut self, attribute: impl Into<String>, directory: impl Into<String>) -> Self {
        self.directories.insert(attribute.into(), directory.into());
        self
    }

    /// Copy the key of size `size` into `column` when `attribute` is converted.
    pub fn with_size_column(
        mut self,
        attribute: impl Into<String>,
        size: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        self.size_columns
            .entry(attribute.into())
            .or_default()
            .push((size.into(), column.into()));
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn is_image_field(&self, attribute: &str) -> bool {
        self.fields.iter().any(|f| f == attribute)
    }

    /// True only for uploads on a listed attribute.
    pub fn should_convert(&self, attribute: &str, value: &AttributeValue) -> bool {
        matches!(value, AttributeValue::Upload(_)) && self.is_image_field(attribute)
    }

    pub fn directory_for(&self, attribute: &str) -> String {
        match self.directories.get(attribute) {
            Some(dir) => dir.clone(),
            None => format!("{}/{}", self.table, attribute),
        }
    }

    pub fn size_column(&self, attribute: &str, size: &str) -> Option<&str> {
        self.size_columns
            .get(attribute)?
            .iter()
            .find(|(name, _)| name == size)
            .map(|(_, column)| column.as_str())
    }
}

/// What to persist in place of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    /// New value for the attribute itself.
    pub value: String,
    /// Extra `(column, key)` pairs for mapped size columns.
    pub siblings: Vec<(String, String)>,
}

/// Convert `value` if it is an upload on an image attribute.
///
/// `Ok(None)` means the value should be persisted as-is.
pub fn before_persist(
    pipeline: &Pipeline<'_>,
    fields: &ImageFields,
    policy: &Policy,
    attribute: &str,
    value: &AttributeValue,
) -> Result<Option<Substitution>, PipelineError> {
    let AttributeValue::Upload(upload) = value else {
        return Ok(None);
    };
    if !fields.is_image_field(attribute) {
        return Ok(None);
    }

    let source = upload.to_source()?;
    let directory = fields.directory_for(attribute);
    let manifest = pipeline.convert(&source, &directory, upload.hint(), policy)?;

    let value = manifest.canonical_key().unwrap_or_default().to_string();
    let siblings = manifest
        .sizes()
        .filter_map(|entry| {
            fields
                .size_column(attribute, &entry.name)
                .map(|column| (column.to_string(), entry.key.clone()))
        })
        .collect();
    Ok(Some(Substitution { value, siblings }))
}

/// [`before_persist`] that never fails.
///
/// On error the failure is logged and `fallback` (typically wherever the
/// upload was stashed) is persisted with no sibling columns.
pub fn before_persist_or_keep(
    pipeline: &Pipeline<'_>,
    fields: &ImageFields,
    policy: &Policy,
    attribute: &str,
    value: &AttributeValue,
    fallback: &str,
) -> Option<Substitution> {
    match before_persist(pipeline, fields, policy, attribute, value) {
        Ok(substitution) => substitution,
        Err(e) => {
            tracing::error!(
                table = %fields.table(),
                attribute,
                stage = %e.stage(),
                error = ?e,
                "WebP conversion failed, keeping fallback"
            );
            Some(Substitution {
                value: fallback.to_string(),
                siblings: Vec::new(),
            })
        }
    }
}

/// Public URL for an image attribute of a stored record.
///
/// With `size`, the mapped size column is read instead of the attribute.
/// An unmapped size falls back to the attribute. Missing or empty values
/// give `None`.
pub fn url_for(
    store: &dyn BlobStore,
    fields: &ImageFields,
    record: &HashMap<String, String>,
    attribute: &str,
    size: Option<&str>,
) -> Option<String> {
    let column = size
        .and_then(|s| fields.size_column(attribute, s))
        .unwrap_or(attribute);
    record
        .get(column)
        .filter(|key| !key.is_empty())
        .map(|key| store.url(key))
}
