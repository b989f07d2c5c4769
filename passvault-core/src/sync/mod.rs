//! Remote event reconciliation and the sync scheduler.
//!
//! The [`EventReconciler`] applies server event batches to the local store
//! transactionally and idempotently; the [`SyncOrchestrator`] drives it on
//! a foreground/background cadence with backoff on transient failures.

pub mod config;
pub mod orchestrator;
pub mod reconciler;

pub use config::SyncConfig;
pub use orchestrator::{SyncMode, SyncOrchestrator, SyncState};
pub use reconciler::{ApplyOutcome, EventReconciler};
