//! # webpify
//!
//! Turns an uploaded JPEG or PNG into a family of WebP files (a full-size
//! re-encode plus one proportionally resized copy per configured width) and
//! commits them to blob storage as a single unit.
//!
//! # Architecture: One Request, One Pipeline
//!
//! ```text
//! SourceImage ─→ validate ─→ decode ─┬─→ encode canonical ─┐
//!                                    ├─→ resize + encode ──┼─→ collect ─→ commit ─→ Manifest
//!                                    └─→ resize + encode ──┘
//! ```
//!
//! The source is decoded once and shared read-only by every derivative task.
//! Nothing touches storage until every task has succeeded. A failed write
//! deletes what the request already wrote, so a caller sees either a
//! complete [`Manifest`] or an error, never a half-populated directory.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`pipeline`] | The state machine: validate, decode, fan out, collect, commit, roll back |
//! | [`imaging`] | Codec seam (`Codec`, `WebpCodec`), raster buffer, resampling, dimension math |
//! | [`naming`] | Stem sanitizing, unique base names, key layout, source fingerprint |
//! | [`store`] | `BlobStore` seam with in-memory and filesystem implementations |
//! | [`config`] | `Policy` plus the `webp.toml` file layer: defaults, merging, validation |
//! | [`hook`] | Attribute-level integration for persistence layers |
//! | [`types`] | `SourceImage`, `SourceFormat`, `DerivativeSpec`, `Manifest` |
//! | [`logging`] | `tracing` subscriber for the binary |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Injected Capabilities
//!
//! Storage, codec, and token generation are traits handed to the
//! [`Pipeline`]. There is no global disk or global config: tests swap in
//! [`MemoryStore`] and a fixed token and get byte-identical keys on every run.
//!
//! ## Request-Local Worker Pool
//!
//! Each conversion builds its own bounded `rayon` pool. Two concurrent
//! conversions never share mutable state; the store is the only shared
//! resource, and unique base names keep them apart.
//!
//! ## WebP Only
//!
//! Every derivative is lossy WebP at the policy's quality. Alpha is kept when
//! the source has it. Pixels are the only thing that survives: EXIF and
//! colour profiles are dropped by the re-encode.

pub mod config;
pub mod hook;
pub mod imaging;
pub mod logging;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod store;
pub mod types;

pub use config::{Config, Policy, SizeSpec};
pub use imaging::{Codec, CodecError, Quality, WebpCodec};
pub use naming::{FixedToken, RandomToken, SequenceToken, TokenSource};
pub use pipeline::{CancelFlag, Pipeline, PipelineError, Stage, ValidationError, convert};
pub use store::{BlobStore, FsStore, MemoryStore, StoreError};
pub use types::{DerivativeEntry, DerivativeSpec, Manifest, SourceFormat, SourceImage};

#[cfg(test)]
pub(crate) mod test_helpers;
