//! Background embedding pipeline for searchkit.
//!
//! Drains the leased task queue through embedding providers, pages host
//! entities into the queue for new models, and turns host change markers into
//! document rewrites, deletions and semantic fan-out.
//!
//! # Main types
//!
//! - [`Worker`]: One drain tick (`drain_once`) and a polling loop (`run`).
//! - [`BackfillEngine`]: Resumable, budgeted cursor paging per partition.
//! - [`Reconciler`]: Applies dirty markers to documents, vectors and tasks.
//! - [`Pipeline`]: Reconcile, backfill and drain as one periodic unit.
//! - [`Runtime`]: Configured models, embedders and host collaborators.

/// Cursor-based backfill of tasks and lexical documents.
pub mod backfill;
/// Retry policy, jitter and outcome classification.
pub mod backoff;
/// Host-provided collaborator traits and an in-memory corpus.
pub mod collaborators;
/// Dirty-marker reconciliation.
pub mod dirty;
/// The drain tick and the polling worker.
pub mod drain;
/// Concurrency gate and token bucket for provider calls.
pub mod gate;
/// Reconcile, backfill and drain orchestration.
pub mod pipeline;
/// Models, embedders and collaborators wired together.
pub mod runtime;

pub use backfill::{BackfillBudget, BackfillEngine, BackfillReport};
pub use backoff::{classify, Decision, JitterSource, NoJitter, OsJitter, RetryPolicy};
pub use collaborators::{
    AssetUrlLister, EntityPager, LexicalDocumentBuilder, MemoryCorpus, Page,
    SemanticDocumentBuilder,
};
pub use dirty::{ReconcileReport, Reconciler};
pub use drain::{DrainReport, Worker};
pub use gate::{DispatchGate, TokenBucket};
pub use pipeline::{Pipeline, PipelineReport};
pub use runtime::Runtime;
