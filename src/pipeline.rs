//! The derivative pipeline: one upload in, a committed set of WebPs out.
//!
//! ## Stages
//!
//! ```text
//! Validating → Decoding → Fanning-Out → Collecting → Committing → Done
//!      │           │            │             │             │
//!      └───────────┴────────────┴─────────────┴─────────────┴──→ Failed
//! ```
//!
//! 1. **Validating**: the policy must be valid, the declared format allowed,
//!    the buffer non-empty. Nothing has been decoded or written yet.
//! 2. **Decoding**: one decode. The raster is shared read-only by every task.
//! 3. **Fanning-Out**: one task per derivative (canonical re-encode plus one
//!    resize+encode per configured size) on a request-local rayon pool.
//! 4. **Collecting**: join. Any failed task fails the request; nothing has
//!    been written, so there is nothing to undo.
//! 5. **Committing**: sequential writes (original first when retained, then
//!    canonical, then sizes in declaration order). A failed write deletes
//!    everything this request already wrote, newest first.
//!
//! A caller gets either a [`Manifest`] whose every key exists in the store,
//! or a [`PipelineError`]. Never a partial manifest.
//!
//! ## Cancellation
//!
//! A [`CancelFlag`] is polled before decoding, at the start of each fan-out
//! task, and before every store write. Cancelling before commit has no side
//! effects; cancelling during commit takes the same rollback path as a failed
//! write.

use crate::config::{Policy, ProcessingConfig, effective_threads};
use crate::imaging::{Codec, CodecError, Quality, RasterImage, WebpCodec, resize};
use crate::naming::{self, RandomToken, TokenSource};
use crate::store::{BlobStore, StoreError};
use crate::types::{DerivativeEntry, DerivativeSpec, Manifest, SourceFormat, SourceImage};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Where a conversion was when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Decoding,
    FanningOut,
    Collecting,
    Committing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Validating => "validating",
            Stage::Decoding => "decoding",
            Stage::FanningOut => "fanning-out",
            Stage::Collecting => "collecting",
            Stage::Committing => "committing",
        })
    }
}

/// Caller errors, detected before any work starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("format not allowed for conversion: {0}")]
    UnsupportedFormat(String),
    #[error("source image is empty")]
    EmptyInput,
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
}

fn rollback_note(incomplete: &bool) -> &'static str {
    if *incomplete {
        " (rollback incomplete)"
    } else {
        ""
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("decode failed")]
    Decode(#[source] CodecError),
    #[error("derivative '{name}' failed")]
    DerivativeFailed {
        name: String,
        #[source]
        source: CodecError,
    },
    #[error("store write failed for {key}{}", rollback_note(.rollback_incomplete))]
    StoreFailure {
        key: String,
        #[source]
        source: StoreError,
        rollback_incomplete: bool,
    },
    #[error("cancelled while {stage}{}", rollback_note(.rollback_incomplete))]
    Cancelled {
        stage: Stage,
        rollback_incomplete: bool,
    },
    #[error("worker pool unavailable: {0}")]
    WorkerPool(String),
}

impl PipelineError {
    /// The stage the request failed in.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Validation(_) => Stage::Validating,
            PipelineError::Decode(_) => Stage::Decoding,
            PipelineError::WorkerPool(_) => Stage::FanningOut,
            PipelineError::DerivativeFailed { .. } => Stage::Collecting,
            PipelineError::StoreFailure { .. } => Stage::Committing,
            PipelineError::Cancelled { stage, .. } => *stage,
        }
    }

    /// True when a rollback left blobs from this request behind.
    pub fn rollback_incomplete(&self) -> bool {
        match self {
            PipelineError::StoreFailure {
                rollback_incomplete,
                ..
            }
            | PipelineError::Cancelled {
                rollback_incomplete,
                ..
            } => *rollback_incomplete,
            _ => false,
        }
    }
}

/// Shared cancellation switch. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One derivative after encoding, before it has a key.
#[derive(Debug)]
struct EncodedDerivative {
    name: String,
    width: u32,
    height: u32,
    bytes: Vec<u8>,
}

/// A blob waiting to be written.
struct PendingWrite<'b> {
    key: String,
    bytes: &'b [u8],
}

/// Converter bound to a store, a codec, and a token source.
///
/// ```no_run
/// use webpify::{MemoryStore, Pipeline, Policy, SourceFormat, SourceImage};
///
/// let store = MemoryStore::new();
/// let source = SourceImage::new(std::fs::read("upload.jpg")?, SourceFormat::Jpeg);
/// let manifest = Pipeline::new(&store).convert(&source, "images", "upload", &Policy::default())?;
/// println!("{}", manifest.canonical_key().unwrap_or_default());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Pipeline<'a> {
    store: &'a dyn BlobStore,
    codec: &'a dyn Codec,
    tokens: &'a dyn TokenSource,
    workers: usize,
}

impl<'a> Pipeline<'a> {
    /// Production codec, random tokens, one worker per core.
    pub fn new(store: &'a dyn BlobStore) -> Self {
        Self {
            store,
            codec: &WebpCodec,
            tokens: &RandomToken,
            workers: effective_threads(&ProcessingConfig::default()),
        }
    }

    pub fn with_codec(mut self, codec: &'a dyn Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_tokens(mut self, tokens: &'a dyn TokenSource) -> Self {
        self.tokens = tokens;
        self
    }

    /// Bound the fan-out pool. Zero is treated as one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Convert `source` and commit every derivative under `directory`.
    pub fn convert(
        &self,
        source: &SourceImage,
        directory: &str,
        base_name_hint: &str,
        policy: &Policy,
    ) -> Result<Manifest, PipelineError> {
        self.convert_with_cancel(source, directory, base_name_hint, policy, &CancelFlag::new())
    }

    /// [`convert`](Self::convert) with cooperative cancellation.
    pub fn convert_with_cancel(
        &self,
        source: &SourceImage,
        directory: &str,
        base_name_hint: &str,
        policy: &Policy,
        cancel: &CancelFlag,
    ) -> Result<Manifest, PipelineError> {
        tracing::debug!(stage = %Stage::Validating, format = %source.format(), bytes = source.bytes().len());
        validate(source, policy)?;

        if cancel.is_cancelled() {
            return Err(cancelled(Stage::Decoding));
        }
        tracing::debug!(stage = %Stage::Decoding);
        let raster = self
            .codec
            .decode(source.bytes(), source.format())
            .map_err(PipelineError::Decode)?;

        let specs = policy.derivative_specs();
        tracing::debug!(
            stage = %Stage::FanningOut,
            width = raster.width(),
            height = raster.height(),
            alpha = raster.has_alpha(),
            tasks = specs.len(),
            workers = self.workers,
        );
        let results = self.fan_out(&raster, &specs, policy.encode_quality(), cancel)?;
        drop(raster);

        tracing::debug!(stage = %Stage::Collecting);
        let encoded = collect(&specs, results, cancel)?;

        let base_name = naming::base_name(base_name_hint, &self.tokens.next_token());
        let original = policy.keep_original.then(|| {
            naming::original_key(directory, &base_name, source.format().extension())
        });

        let mut writes = Vec::with_capacity(encoded.len() + 1);
        if let Some(key) = &original {
            writes.push(PendingWrite {
                key: key.clone(),
                bytes: source.bytes(),
            });
        }
        let mut entries = Vec::with_capacity(encoded.len());
        for derivative in &encoded {
            let key = if derivative.name == crate::types::CANONICAL {
                naming::primary_key(directory, &base_name)
            } else {
                naming::sized_key(directory, &base_name, &derivative.name)
            };
            writes.push(PendingWrite {
                key: key.clone(),
                bytes: &derivative.bytes,
            });
            entries.push(DerivativeEntry {
                name: derivative.name.clone(),
                key,
                width: derivative.width,
                height: derivative.height,
                size: derivative.bytes.len(),
            });
        }

        tracing::debug!(stage = %Stage::Committing, base_name = %base_name, writes = writes.len());
        self.commit(&writes, cancel)?;

        tracing::info!(
            base_name = %base_name,
            derivatives = entries.len(),
            original = original.is_some(),
            "conversion committed"
        );
        Ok(Manifest {
            base_name,
            fingerprint: naming::fingerprint(source.bytes()),
            entries,
            original,
        })
    }

    /// Run every derivative task on a pool of `self.workers` threads.
    ///
    /// `None` marks a task skipped because the request was cancelled.
    /// Results come back in `specs` order.
    fn fan_out(
        &self,
        raster: &RasterImage,
        specs: &[DerivativeSpec],
        quality: Quality,
        cancel: &CancelFlag,
    ) -> Result<Vec<Option<Result<EncodedDerivative, CodecError>>>, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("webpify-encode-{i}"))
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;
        let codec = self.codec;

        Ok(pool.install(|| {
            specs
                .par_iter()
                .map(|spec| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    Some(encode_derivative(codec, raster, spec, quality))
                })
                .collect()
        }))
    }

    /// Write every pending blob in order; undo on failure or cancellation.
    fn commit(&self, writes: &[PendingWrite<'_>], cancel: &CancelFlag) -> Result<(), PipelineError> {
        let mut planned = HashSet::with_capacity(writes.len());
        for write in writes {
            if !planned.insert(write.key.as_str()) {
                return Err(ValidationError::InvalidPolicy(format!(
                    "two derivatives map to the same key: {}",
                    write.key
                ))
                .into());
            }
            if self.store.exists(&write.key) {
                return Err(PipelineError::StoreFailure {
                    key: write.key.clone(),
                    source: StoreError::AlreadyExists(write.key.clone()),
                    rollback_incomplete: false,
                });
            }
        }

        let mut written: Vec<&str> = Vec::with_capacity(writes.len());
        for write in writes {
            if cancel.is_cancelled() {
                let rollback_incomplete = !self.rollback(&written);
                return Err(PipelineError::Cancelled {
                    stage: Stage::Committing,
                    rollback_incomplete,
                });
            }
            if let Err(source) = self.store.put(&write.key, write.bytes) {
                tracing::debug!(key = %write.key, error = ?source, "store write failed, rolling back");
                // The key was absent before this request, so a leftover is ours to remove.
                if self.store.exists(&write.key) {
                    written.push(&write.key);
                }
                let rollback_incomplete = !self.rollback(&written);
                return Err(PipelineError::StoreFailure {
                    key: write.key.clone(),
                    source,
                    rollback_incomplete,
                });
            }
            tracing::debug!(key = %write.key, bytes = write.bytes.len(), "committed");
            written.push(&write.key);
        }
        Ok(())
    }

    /// Delete `written` newest first. Returns false if any delete failed.
    fn rollback(&self, written: &[&str]) -> bool {
        let mut complete = true;
        for key in written.iter().rev() {
            if let Err(e) = self.store.delete(key) {
                tracing::warn!(key = %key, error = ?e, "rollback could not delete blob");
                complete = false;
            }
        }
        complete
    }
}

/// Convert with the production codec and random tokens.
pub fn convert(
    store: &dyn BlobStore,
    source: &SourceImage,
    directory: &str,
    base_name_hint: &str,
    policy: &Policy,
) -> Result<Manifest, PipelineError> {
    Pipeline::new(store).convert(source, directory, base_name_hint, policy)
}

fn cancelled(stage: Stage) -> PipelineError {
    PipelineError::Cancelled {
        stage,
        rollback_incomplete: false,
    }
}

fn validate(source: &SourceImage, policy: &Policy) -> Result<(), ValidationError> {
    policy
        .validate()
        .map_err(|e| ValidationError::InvalidPolicy(e.to_string()))?;
    if !policy.allows(source.format()) {
        return Err(ValidationError::UnsupportedFormat(
            source.format().to_string(),
        ));
    }
    if source.is_empty() {
        return Err(ValidationError::EmptyInput);
    }
    Ok(())
}

/// Check a declared extension against the policy before reading any bytes.
///
/// Unknown extensions and known-but-disallowed formats are both
/// [`ValidationError::UnsupportedFormat`].
pub fn format_for_extension(
    extension: &str,
    policy: &Policy,
) -> Result<SourceFormat, ValidationError> {
    SourceFormat::from_extension(extension)
        .filter(|f| policy.allows(*f))
        .ok_or_else(|| ValidationError::UnsupportedFormat(extension.to_ascii_lowercase()))
}

fn encode_derivative(
    codec: &dyn Codec,
    raster: &RasterImage,
    spec: &DerivativeSpec,
    quality: Quality,
) -> Result<EncodedDerivative, CodecError> {
    let (width, height, bytes) = match spec.target_width {
        None => {
            let bytes = codec.encode_webp(raster, quality)?;
            (raster.width(), raster.height(), bytes)
        }
        Some(target) => {
            let resized = resize(raster, target);
            let bytes = codec.encode_webp(&resized, quality)?;
            (resized.width(), resized.height(), bytes)
        }
    };
    Ok(EncodedDerivative {
        name: spec.name.clone(),
        width,
        height,
        bytes,
    })
}

/// Turn task results into encoded derivatives, or the first failure in
/// declaration order.
fn collect(
    specs: &[DerivativeSpec],
    results: Vec<Option<Result<EncodedDerivative, CodecError>>>,
    cancel: &CancelFlag,
) -> Result<Vec<EncodedDerivative>, PipelineError> {
    if cancel.is_cancelled() || results.iter().any(Option::is_none) {
        return Err(cancelled(Stage::FanningOut));
    }
    specs
        .iter()
        .zip(results.into_iter().flatten())
        .map(|(spec, result)| {
            result.map_err(|source| PipelineError::DerivativeFailed {
                name: spec.name.clone(),
                source,
            })
        })
        .collect()
}
