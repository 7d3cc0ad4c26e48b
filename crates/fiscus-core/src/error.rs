//! # Error Types
//!
//! Domain errors for fiscus-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fiscus-core errors (this file)                                        │
//! │  └── CoreError        - Invalid keys, TTLs and policy names            │
//! │                                                                         │
//! │  fiscus-cache errors                                                   │
//! │  └── CacheError       - Codec, corruption and storage failures         │
//! │                                                                         │
//! │  fiscus-sync errors                                                    │
//! │  └── SyncError        - What SDK callers see                           │
//! │                                                                         │
//! │  Flow: CoreError → CacheError → SyncError → caller                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Core domain errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A cache key failed validation.
    ///
    /// ## When This Occurs
    /// - Empty key
    /// - Key longer than [`crate::MAX_KEY_LENGTH`]
    /// - Key containing control characters
    #[error("Invalid cache key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// A TTL of zero was supplied (use `None` for "never expires").
    #[error("Invalid TTL: {ttl_ms}ms (must be greater than zero)")]
    InvalidTtl { ttl_ms: u64 },

    /// A policy or enum name could not be parsed.
    #[error("Unknown {kind}: '{value}'. Valid options: {allowed}")]
    UnknownVariant {
        kind: &'static str,
        value: String,
        allowed: &'static str,
    },
}

impl CoreError {
    /// Creates an UnknownVariant error.
    pub fn unknown(kind: &'static str, value: impl Into<String>, allowed: &'static str) -> Self {
        CoreError::UnknownVariant {
            kind,
            value: value.into(),
            allowed,
        }
    }
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InvalidTtl { ttl_ms: 0 };
        assert_eq!(err.to_string(), "Invalid TTL: 0ms (must be greater than zero)");

        let err = CoreError::unknown("eviction policy", "mru", "lru, lfu, fifo, random");
        assert_eq!(
            err.to_string(),
            "Unknown eviction policy: 'mru'. Valid options: lru, lfu, fifo, random"
        );
    }
}
