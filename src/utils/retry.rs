//! Bounded retry with exponential backoff for ledger calls.
//!
//! Every attempt is wrapped in a timeout. Only transient errors are retried;
//! after `max_attempts` the last error is returned to the caller, which logs
//! it and moves on.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::LedgerSettings;
use crate::utils::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &LedgerSettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            initial_backoff: Duration::from_millis(settings.backoff_ms),
            call_timeout: Duration::from_millis(settings.timeout_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Await `fut`, failing with `LedgerTimeout(op)` once `limit` elapses.
pub async fn with_timeout<T, F>(op: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::LedgerTimeout(op)),
    }
}

/// Run `call` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are exhausted.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, op: &'static str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;

    loop {
        match with_timeout(op, policy.call_timeout, call()).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() || attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                warn!(
                    "{op} failed (attempt {attempt}/{}): {e}; retrying in {:?}",
                    policy.max_attempts, backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
        }
    }
}
