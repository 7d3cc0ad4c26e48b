//! # Validation Module
//!
//! Input validation for cache keys and TTLs, applied before anything reaches
//! the entry store.
//!
//! ## Usage
//! ```rust
//! use fiscus_core::validation::{validate_key, validate_ttl};
//!
//! validate_key("receipt:2024-0001").unwrap();
//! validate_ttl(Some(30_000)).unwrap();
//! assert!(validate_key("").is_err());
//! ```

use crate::error::{CoreError, CoreResult};
use crate::MAX_KEY_LENGTH;

/// Validates a cache key.
///
/// ## Rules
/// - Must not be empty
/// - At most [`MAX_KEY_LENGTH`] bytes
/// - No control characters (keys end up in durable storage key names)
pub fn validate_key(key: &str) -> CoreResult<()> {
    if key.is_empty() {
        return Err(invalid(key, "key must not be empty"));
    }

    if key.len() > MAX_KEY_LENGTH {
        return Err(invalid(
            key,
            &format!("key exceeds {} bytes", MAX_KEY_LENGTH),
        ));
    }

    if key.chars().any(char::is_control) {
        return Err(invalid(key, "key contains control characters"));
    }

    Ok(())
}

/// Validates a TTL. `None` is valid and means "never expires by time".
pub fn validate_ttl(ttl_ms: Option<u64>) -> CoreResult<()> {
    match ttl_ms {
        Some(0) => Err(CoreError::InvalidTtl { ttl_ms: 0 }),
        _ => Ok(()),
    }
}

fn invalid(key: &str, reason: &str) -> CoreError {
    CoreError::InvalidKey {
        key: key.chars().take(64).collect(),
        reason: reason.to_string(),
    }
}
