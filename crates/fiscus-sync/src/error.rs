//! # Sync Error Types
//!
//! Error types for read, write and replay operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Collaborators │  │     Data                │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Network        │  │  Corruption             │ │
//! │  │  ConfigLoad...  │  │  Storage        │  │  NoDataOffline          │ │
//! │  │  ConfigSave...  │  │  Queue          │  │  Serialization          │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │   Mutations     │  │    Internal     │                              │
//! │  │                 │  │                 │                              │
//! │  │  QueueExhausted │  │  Cancelled      │                              │
//! │  │  Conflict       │  │  ChannelError   │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `SyncError` is `Clone`: one in-flight fetch result is handed to every
//! caller that joined it.

use fiscus_cache::CacheError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// The network transport failed. Transient unless the server answered
    /// with a client error status.
    #[error("Network error{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Network { message: String, status: Option<u16> },

    /// The durable key-value store failed. Never fatal to in-memory state.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The offline queue collaborator failed.
    #[error("Queue error: {0}")]
    Queue(String),

    // =========================================================================
    // Data Errors
    // =========================================================================
    /// Checksum or decode mismatch. Handled by eviction inside the cache;
    /// only surfaces from persistence maintenance calls.
    #[error("Corrupted data for '{key}': {reason}")]
    Corruption { key: String, reason: String },

    /// Offline with neither a cached nor a durable value.
    #[error("No data available offline for '{key}'")]
    NoDataOffline { key: String },

    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Key or TTL rejected by validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // =========================================================================
    // Mutation Errors
    // =========================================================================
    /// A queued mutation used up its retry budget and was dropped.
    #[error("Mutation {id} exhausted after {attempts} attempts: {last_error}")]
    QueueExhausted {
        id: String,
        attempts: u32,
        last_error: String,
    },

    /// Server state disagrees with the queued write under a manual policy.
    #[error("Unresolved conflict for mutation {id}")]
    Conflict { id: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// A read was superseded or invalidated while in flight.
    #[error("Request for '{key}' was cancelled")]
    Cancelled { key: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl SyncError {
    /// Transient network failure without a status.
    pub fn network(message: impl Into<String>) -> Self {
        SyncError::Network {
            message: message.into(),
            status: None,
        }
    }

    /// Network failure carrying an HTTP status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        SyncError::Network {
            message: message.into(),
            status: Some(status),
        }
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CacheError> for SyncError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Storage(msg) => SyncError::Storage(msg),
            CacheError::Corruption { key, reason } => SyncError::Corruption { key, reason },
            CacheError::Serialization(msg) => SyncError::Serialization(msg),
            CacheError::InvalidInput(e) => SyncError::InvalidInput(e.to_string()),
            CacheError::ChannelError(msg) => SyncError::ChannelError(msg),
            other => SyncError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried.
    ///
    /// Network failures are retryable unless the server rejected the request
    /// with a 4xx status (408 and 429 excepted).
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { status, .. } => match status {
                Some(code) if (400..500).contains(code) => *code == 408 || *code == 429,
                _ => true,
            },
            _ => false,
        }
    }

    /// Returns true for any failure of the network transport.
    pub fn is_network_error(&self) -> bool {
        matches!(self, SyncError::Network { .. })
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
