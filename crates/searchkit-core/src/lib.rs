//! Core types and error definitions for searchkit.
//!
//! This crate provides the foundational types shared across all searchkit crates:
//! the task/model data model, error handling with explicit retry classification,
//! configuration loading, an injectable clock and cooperative cancellation.
//!
//! # Main types
//!
//! - [`SearchkitError`]: Unified error enum for all searchkit subsystems.
//! - [`SearchkitResult`]: Convenience alias for `Result<T, SearchkitError>`.
//! - [`ErrorKind`]: Retry classification tag (`Transient | Permanent | NotFound`).
//! - [`TaskKey`]: Identity shared by embedding tasks, vectors and dead letters.
//! - [`Task`]: A leased unit of embedding work.
//! - [`ModelSpec`]: An embedding model the registry knows about.
//! - [`SearchkitConfig`]: TOML-backed configuration for the whole pipeline.
//! - [`Clock`]: Time source (system or manual for tests).
//! - [`CancellationToken`]: Cancellation signal observed by every wait in a tick.

/// Cooperative cancellation for ticks and background loops.
pub mod cancel;
/// Injectable time source.
pub mod clock;
/// Configuration structures and TOML loading.
pub mod config;
/// Error type and retry classification.
pub mod error;
/// Data model shared by the store, worker and search crates.
pub mod types;

pub use cancel::CancellationToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BackfillOptions, EmbedderConfig, LogFormat, LoggingConfig, PipelineOptions, SearchOptions,
    SearchkitConfig, StoreConfig, WorkerOptions,
};
pub use error::{ErrorKind, SearchkitError, SearchkitResult};
pub use types::{
    BackfillState, BackfillStatus, DeadLetterRecord, DirtyMarker, EntityRef, Modality, ModelSpec,
    Task, TaskKey,
};
