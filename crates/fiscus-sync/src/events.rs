//! # Sync Events
//!
//! Outbound notifications for the host UI: replay progress, unresolved
//! conflicts, exhausted mutations and connectivity changes.

use fiscus_core::{ConflictPolicy, QueuedMutation};
use serde::Serialize;
use serde_json::Value;
use ts_rs::TS;

/// A delayed delivery whose server result disagrees with the local projection.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct ConflictReport {
    pub mutation_id: String,
    pub resource_type: String,
    pub cache_key: Option<String>,
    pub policy: ConflictPolicy,
    /// The optimistic projection written when the mutation was queued.
    #[ts(type = "unknown")]
    pub local: Value,
    /// What the server returned on delivery.
    #[ts(type = "unknown")]
    pub server: Value,
}

/// Trait for emitting sync events (implemented by the host integration).
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a replay progress event.
    fn emit_progress(&self, pending: usize, synced: usize);

    /// Emits a conflict the engine did not resolve on its own.
    fn emit_conflict(&self, report: &ConflictReport);

    /// Emits a mutation dropped after exhausting its retries.
    fn emit_exhausted(&self, mutation: &QueuedMutation);

    /// Emits a connectivity change.
    fn emit_connectivity(&self, online: bool);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_progress(&self, _pending: usize, _synced: usize) {}
    fn emit_conflict(&self, _report: &ConflictReport) {}
    fn emit_exhausted(&self, _mutation: &QueuedMutation) {}
    fn emit_connectivity(&self, _online: bool) {}
}
