//! # Retry Policy
//!
//! Shared by reads and online writes.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  attempt ──► Err ──► failure_count += 1                                 │
//! │                        │                                                │
//! │         offline? ──────┼──────────────────────────► give up            │
//! │   policy says no? ─────┼──────────────────────────► give up            │
//! │                        ▼                                                │
//! │            sleep(base × 2^n, capped)                                    │
//! │                 │      └── went offline meanwhile ─► give up at once   │
//! │                 ▼                                                       │
//! │              attempt again                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delays come from `backoff::ExponentialBackoff` with multiplier 2 and no
//! jitter. Timers may fire late under load, never early.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::debug;

use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};

/// Decides whether a failed attempt is retried.
#[derive(Clone, Default)]
pub enum RetryPolicy {
    /// Fail on the first error.
    #[default]
    Never,
    /// Retry retryable errors without limit while online.
    Always,
    /// Retry retryable errors up to this many times.
    Count(u32),
    /// Caller decides from the failure count (1-based) and the error.
    Custom(Arc<dyn Fn(u32, &SyncError) -> bool + Send + Sync>),
}

impl RetryPolicy {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32, &SyncError) -> bool + Send + Sync + 'static,
    {
        RetryPolicy::Custom(Arc::new(f))
    }

    /// `failure_count` is the number of failures so far, including this one.
    pub fn should_retry(&self, failure_count: u32, error: &SyncError) -> bool {
        match self {
            RetryPolicy::Never => false,
            RetryPolicy::Always => error.is_retryable(),
            RetryPolicy::Count(max) => failure_count <= *max && error.is_retryable(),
            RetryPolicy::Custom(f) => f(failure_count, error),
        }
    }
}

impl From<u32> for RetryPolicy {
    fn from(max: u32) -> Self {
        if max == 0 {
            RetryPolicy::Never
        } else {
            RetryPolicy::Count(max)
        }
    }
}

impl From<bool> for RetryPolicy {
    fn from(retry: bool) -> Self {
        if retry {
            RetryPolicy::Always
        } else {
            RetryPolicy::Never
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryPolicy::Never => write!(f, "Never"),
            RetryPolicy::Always => write!(f, "Always"),
            RetryPolicy::Count(n) => write!(f, "Count({})", n),
            RetryPolicy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Exponential delay schedule: `base × 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDelay {
    pub base: Duration,
    pub max: Duration,
}

impl RetryDelay {
    pub fn new(base: Duration, max: Duration) -> Self {
        RetryDelay { base, max }
    }

    pub fn from_millis(base_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms))
    }

    /// Creates the exponential backoff schedule.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base,
            initial_interval: self.base,
            max_interval: self.max,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

impl Default for RetryDelay {
    fn default() -> Self {
        Self::from_millis(1000, 30_000)
    }
}

/// Runs `op` until it succeeds, the policy gives up, or the device goes offline.
///
/// `on_failure` sees every failure with its 1-based count before the retry
/// decision is made.
pub async fn retry_while_online<T, F, Fut, R>(
    mut op: F,
    policy: &RetryPolicy,
    delay: RetryDelay,
    connectivity: &ConnectivityMonitor,
    mut on_failure: R,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
    R: FnMut(u32, &SyncError),
{
    let mut backoff = delay.backoff();
    let mut failures: u32 = 0;

    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        failures += 1;
        on_failure(failures, &error);

        if !connectivity.is_online() || !policy.should_retry(failures, &error) {
            return Err(error);
        }

        let wait = backoff.next_backoff().unwrap_or(delay.max);
        debug!(attempt = failures, ?wait, error = %error, "Retrying after failure");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = connectivity.wait_offline() => {
                debug!(attempt = failures, "Went offline, cancelling retry");
                return Err(error);
            }
        }
    }
}
