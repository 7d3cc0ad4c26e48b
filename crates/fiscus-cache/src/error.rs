//! # Cache Error Types
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  flate2 / serde_json / DurableStore failure                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  CacheError (this module) ← Adds key context and categorization        │
//! │       │                                                                 │
//! │       ├──► Corruption: logged, entry evicted, NEVER returned by get()  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError (fiscus-sync) ← What SDK callers see                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use fiscus_core::CoreError;
use thiserror::Error;

/// Cache and persistence errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Key or TTL rejected by validation.
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] CoreError),

    /// Entry failed its checksum or could not be decoded.
    ///
    /// ## When This Occurs
    /// - Stored bytes changed after the checksum was taken
    /// - Compressed payload is not valid codec output
    /// - Persisted entry JSON does not match the entry shape
    #[error("Corrupted entry '{key}': {reason}")]
    Corruption { key: String, reason: String },

    /// Compression or decompression failed.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Value could not be converted to or from JSON.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The durable key-value collaborator failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A persisted snapshot was written by an incompatible format version.
    #[error("Unsupported snapshot version {found} (supported: {supported})")]
    UnsupportedSnapshotVersion { found: u32, supported: u32 },

    /// Background task channel closed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl CacheError {
    /// Creates a Corruption error.
    pub fn corruption(key: impl Into<String>, reason: impl Into<String>) -> Self {
        CacheError::Corruption {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error came from the durable store.
    pub fn is_storage_error(&self) -> bool {
        matches!(self, CacheError::Storage(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Codec(err.to_string())
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::corruption("receipt:1", "checksum mismatch");
        assert_eq!(err.to_string(), "Corrupted entry 'receipt:1': checksum mismatch");

        let err = CacheError::UnsupportedSnapshotVersion {
            found: 7,
            supported: 1,
        };
        assert!(err.to_string().contains("7"));
    }

    #[test]
    fn test_core_error_converts() {
        let err: CacheError = CoreError::InvalidTtl { ttl_ms: 0 }.into();
        assert!(matches!(err, CacheError::InvalidInput(_)));
        assert!(!err.is_storage_error());
    }
}
