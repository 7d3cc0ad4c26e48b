//! # Queued Mutations
//!
//! A write that could not complete online, waiting for delivery.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     QueuedMutation Lifecycle                            │
//! │                                                                         │
//! │   new() ──► Pending ──add to queue──► Queued                           │
//! │                                         │                               │
//! │                                   replay attempt                        │
//! │                                         ▼                               │
//! │                                      Syncing                            │
//! │                                   ┌─────┴──────┐                        │
//! │                              ack  │            │ failure                │
//! │                                   ▼            ▼                        │
//! │                                Synced       Failed ──retry──► Syncing   │
//! │                             (removed from      │                        │
//! │                                queue)          │ retry_count > max      │
//! │                                                ▼                        │
//! │                                         QueueExhausted                  │
//! │                                   (removed, surfaced to caller)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Exactly one QueuedMutation exists per logical offline write attempt. It is
//! removed only after server acknowledgement, explicit cancellation, or
//! exhaustion; never silently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::CoreError;

// =============================================================================
// Mutation Kind
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    Custom,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationKind::Create => write!(f, "create"),
            MutationKind::Update => write!(f, "update"),
            MutationKind::Delete => write!(f, "delete"),
            MutationKind::Custom => write!(f, "custom"),
        }
    }
}

// =============================================================================
// Mutation Priority
// =============================================================================

/// Replay order: Critical items (fiscal receipts) go first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize, TS,
)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MutationPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl std::str::FromStr for MutationPriority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(MutationPriority::Critical),
            "high" => Ok(MutationPriority::High),
            "normal" => Ok(MutationPriority::Normal),
            "low" => Ok(MutationPriority::Low),
            other => Err(CoreError::unknown(
                "mutation priority",
                other,
                "critical, high, normal, low",
            )),
        }
    }
}

// =============================================================================
// Conflict Policy
// =============================================================================

/// How a delayed delivery reconciles with a server state that differs from
/// the optimistic projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Re-push local data.
    ClientWins,
    /// Discard local changes in favour of the server payload.
    #[default]
    ServerWins,
    /// Combine both through a caller-supplied merge function.
    Merge,
    /// Report the conflict; resolve nothing.
    Manual,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::ClientWins => write!(f, "client_wins"),
            ConflictPolicy::ServerWins => write!(f, "server_wins"),
            ConflictPolicy::Merge => write!(f, "merge"),
            ConflictPolicy::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "client_wins" | "client" => Ok(ConflictPolicy::ClientWins),
            "server_wins" | "server" => Ok(ConflictPolicy::ServerWins),
            "merge" => Ok(ConflictPolicy::Merge),
            "manual" => Ok(ConflictPolicy::Manual),
            other => Err(CoreError::unknown(
                "conflict policy",
                other,
                "client_wins, server_wins, merge, manual",
            )),
        }
    }
}

// =============================================================================
// Mutation Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    #[default]
    Pending,
    Queued,
    Syncing,
    Synced,
    Failed,
}

impl MutationStatus {
    /// Returns true if the replay scheduler should pick this item up.
    pub fn is_replayable(&self) -> bool {
        matches!(self, MutationStatus::Queued | MutationStatus::Failed)
    }
}

impl std::fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationStatus::Pending => write!(f, "pending"),
            MutationStatus::Queued => write!(f, "queued"),
            MutationStatus::Syncing => write!(f, "syncing"),
            MutationStatus::Synced => write!(f, "synced"),
            MutationStatus::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Queued Mutation
// =============================================================================

/// One write operation awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueuedMutation {
    /// Unique identifier (UUID v4), used for de-duplication and cancellation.
    pub id: String,
    pub kind: MutationKind,
    /// Resource type, e.g. "receipt", "invoice".
    pub resource_type: String,
    /// The mutation variables as sent to the server.
    #[ts(type = "unknown")]
    pub payload: Value,
    pub priority: MutationPriority,
    pub conflict_policy: ConflictPolicy,
    pub status: MutationStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Last delivery error, if any.
    pub last_error: Option<String>,
    /// Cache key holding the optimistic projection of this write.
    #[serde(default)]
    pub cache_key: Option<String>,
    /// The optimistic projection written at enqueue time.
    #[serde(default)]
    #[ts(type = "unknown")]
    pub optimistic: Option<Value>,
    /// What `cache_key` held before the projection; restored if the write
    /// is never delivered.
    #[serde(default)]
    #[ts(type = "unknown")]
    pub previous: Option<Value>,
    /// Cache key prefixes to invalidate once the server acknowledges the write.
    #[serde(default)]
    pub invalidates: Vec<String>,
}

impl QueuedMutation {
    /// Default retry budget for a queued mutation.
    pub const DEFAULT_MAX_RETRIES: u32 = 5;

    /// Creates a pending mutation with a fresh id.
    pub fn new(kind: MutationKind, resource_type: impl Into<String>, payload: Value) -> Self {
        let now = Utc::now();
        QueuedMutation {
            id: Uuid::new_v4().to_string(),
            kind,
            resource_type: resource_type.into(),
            payload,
            priority: MutationPriority::default(),
            conflict_policy: ConflictPolicy::default(),
            status: MutationStatus::Pending,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            last_error: None,
            cache_key: None,
            optimistic: None,
            previous: None,
            invalidates: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: MutationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_cache_key(mut self, key: Option<String>) -> Self {
        self.cache_key = key;
        self
    }

    pub fn with_optimistic(mut self, projection: Option<Value>) -> Self {
        self.optimistic = projection;
        self
    }

    pub fn with_previous(mut self, previous: Option<Value>) -> Self {
        self.previous = previous;
        self
    }

    pub fn with_invalidates(mut self, prefixes: Vec<String>) -> Self {
        self.invalidates = prefixes;
        self
    }

    // =========================================================================
    // State Transitions
    // =========================================================================

    pub fn mark_queued(&mut self) {
        self.set_status(MutationStatus::Queued);
    }

    pub fn mark_syncing(&mut self) {
        self.set_status(MutationStatus::Syncing);
    }

    pub fn mark_synced(&mut self) {
        self.last_error = None;
        self.set_status(MutationStatus::Synced);
    }

    /// Records a failed delivery attempt.
    ///
    /// Returns true once the item has failed more than `max_retries` times,
    /// i.e. the first attempt plus `max_retries` retries have all failed.
    pub fn record_failure(&mut self, error: impl Into<String>) -> bool {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.set_status(MutationStatus::Failed);
        self.is_exhausted()
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count > self.max_retries
    }

    /// Puts a failed item back in line with a fresh retry budget.
    pub fn reset_for_retry(&mut self) {
        self.retry_count = 0;
        self.last_error = None;
        self.set_status(MutationStatus::Queued);
    }

    fn set_status(&mut self, status: MutationStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_mutation_defaults() {
        let m = QueuedMutation::new(MutationKind::Create, "receipt", json!({"total": 100}));
        assert_eq!(m.status, MutationStatus::Pending);
        assert_eq!(m.retry_count, 0);
        assert_eq!(m.max_retries, QueuedMutation::DEFAULT_MAX_RETRIES);
        assert!(!m.id.is_empty());

        let other = QueuedMutation::new(MutationKind::Create, "receipt", json!({}));
        assert_ne!(m.id, other.id);
    }

    #[test]
    fn test_failure_exhausts_budget() {
        let mut m =
            QueuedMutation::new(MutationKind::Update, "invoice", json!({})).with_max_retries(2);
        m.mark_queued();
        assert!(m.status.is_replayable());

        assert!(!m.record_failure("timeout"));
        assert_eq!(m.status, MutationStatus::Failed);
        assert!(m.status.is_replayable());

        // Two retries allowed: the third failure exhausts
        assert!(!m.record_failure("timeout"));
        assert!(m.record_failure("timeout"));
        assert_eq!(m.retry_count, 3);
        assert_eq!(m.last_error.as_deref(), Some("timeout"));

        m.reset_for_retry();
        assert_eq!(m.retry_count, 0);
        assert_eq!(m.status, MutationStatus::Queued);
    }

    #[test]
    fn test_zero_retries_exhausts_on_first_failure() {
        let mut m =
            QueuedMutation::new(MutationKind::Create, "receipt", json!({})).with_max_retries(0);
        assert!(m.record_failure("rejected"));

        let mut m =
            QueuedMutation::new(MutationKind::Create, "receipt", json!({})).with_max_retries(1);
        assert!(!m.record_failure("timeout"));
        assert!(!m.is_exhausted());
    }

    #[test]
    fn test_priority_ordering() {
        let mut priorities = vec![
            MutationPriority::Low,
            MutationPriority::Critical,
            MutationPriority::Normal,
            MutationPriority::High,
        ];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![
                MutationPriority::Critical,
                MutationPriority::High,
                MutationPriority::Normal,
                MutationPriority::Low,
            ]
        );
    }

    #[test]
    fn test_conflict_policy_parsing() {
        assert_eq!(
            "client-wins".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::ClientWins
        );
        assert_eq!("merge".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Merge);
        assert!("lww".parse::<ConflictPolicy>().is_err());
    }
}
