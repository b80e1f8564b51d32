//! Retry with backoff for external I/O.
//!
//! Every call that leaves the process (sheet reads and writes, marketplace
//! updates) goes through a [`RetryPolicy`] at its call site. Retryable
//! failures are retried with a fixed or exponential delay; anything else
//! is returned immediately.

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::RepricerError;

/// Upper bound on a single backoff sleep.
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// Retry settings for one class of external call.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff: Backoff,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_backoff() -> Backoff {
    Backoff::Exponential
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            backoff: Backoff::Exponential,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_retries,
            base_delay_ms: base_delay.as_millis() as u64,
            backoff,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Backoff::Fixed)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.base_delay_ms,
            Backoff::Exponential => self
                .base_delay_ms
                .saturating_mul(2u64.saturating_pow(retry.saturating_sub(1))),
        };
        Duration::from_millis(ms.min(self.max_delay_ms))
    }

    /// Run `op`, retrying errors for which [`RepricerError::is_retryable`] holds.
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> Result<T, RepricerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RepricerError>>,
    {
        self.run_if(label, op, RepricerError::is_retryable).await
    }

    /// Run `op`, retrying errors accepted by `is_retryable` up to
    /// `max_retries` times. The last error is returned once retries run out.
    pub async fn run_if<T, F, Fut, P>(
        &self,
        label: &str,
        mut op: F,
        is_retryable: P,
    ) -> Result<T, RepricerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RepricerError>>,
        P: Fn(&RepricerError) -> bool,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !is_retryable(&e) => {
                    warn!(op = label, attempt, error = %e, "Non-retryable failure");
                    return Err(e);
                }
                Err(e) if attempt > self.max_retries => {
                    warn!(
                        op = label,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Retries exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        op = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
