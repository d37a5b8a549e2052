//! Retry and pacing for rate-limited API calls
//!
//! Every request an API client makes goes through [`RetryPolicy::run`].
//! Only [`Error::RateLimited`] is retried; everything else fails on the
//! first attempt. The backoff doubles per attempt starting from the larger
//! of the remote's period hint and the configured initial backoff, and is
//! capped at the configured maximum.
//!
//! [`RateLimitState`] is shared by every clone of a client. A rate-limit
//! response blocks all workers until the backoff elapses, and with
//! `parallelism` set, each response's rate-limit headers can push the
//! shared gate forward before the bucket runs dry.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};

/// Rate-limit headers observed on a response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Requests allowed per period (`X-RateLimit-Limit`)
    pub limit: Option<u32>,
    /// Requests left in the bucket (`X-RateLimit-Remaining`)
    pub remaining: Option<u32>,
    /// Replenishment period (`X-RateLimit-Period`)
    pub period: Option<Duration>,
}

/// Process-wide "do not send before" gate
#[derive(Debug, Default)]
pub struct RateLimitState {
    blocked_until: Mutex<Option<Instant>>,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every request for at least `delay` from now
    ///
    /// An existing later deadline is kept.
    pub fn block_for(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut blocked = self
            .blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *blocked {
            Some(current) if current >= until => {}
            _ => *blocked = Some(until),
        }
    }

    /// Remaining time before requests may be sent
    pub fn remaining_block(&self) -> Option<Duration> {
        let blocked = self
            .blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        blocked.and_then(|until| (until > now).then(|| until - now))
    }

    /// Sleep until the gate opens
    pub async fn wait(&self) {
        while let Some(delay) = self.remaining_block() {
            debug!(delay = ?delay, "Waiting for rate limit window");
            tokio::time::sleep(delay).await;
        }
    }
}

/// Bounded retry with exponential backoff for rate-limited calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retry_count: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    parallelism: Option<u32>,
    state: Arc<RateLimitState>,
}

impl RetryPolicy {
    /// Build a policy with its own shared state
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            retry_count: config.retry_count.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            parallelism: config.parallelism,
            state: Arc::new(RateLimitState::new()),
        }
    }

    /// Share an existing rate-limit state
    pub fn with_state(mut self, state: Arc<RateLimitState>) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &Arc<RateLimitState> {
        &self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Delay before retrying after the given (1-based) failed attempt
    pub fn backoff_for(&self, attempt: u32, period_hint: Option<Duration>) -> Duration {
        let base = period_hint
            .unwrap_or_default()
            .max(self.initial_backoff);
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        base.checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Pre-emptive delay for the next request given a response's headers
    ///
    /// Only active with `parallelism` set: once the bucket holds no more
    /// than `parallelism` tokens, each worker waits for the time it takes
    /// to replenish that many.
    pub fn pacing_delay(&self, headers: &RateLimitHeaders) -> Option<Duration> {
        let parallelism = self.parallelism?;
        let limit = headers.limit.filter(|limit| *limit > 0)?;
        let remaining = headers.remaining?;
        let period = headers.period?;
        if remaining > parallelism {
            return None;
        }
        Some(period / limit * parallelism)
    }

    /// Record a response's rate-limit headers
    pub fn observe(&self, headers: &RateLimitHeaders) {
        if let Some(delay) = self.pacing_delay(headers) {
            debug!(
                remaining = ?headers.remaining,
                delay = ?delay,
                "Pacing requests ahead of rate limit"
            );
            self.state.block_for(delay);
        }
    }

    /// Run an operation, retrying while it reports `RateLimited`
    ///
    /// Makes at most `retry_count` attempts; the last `RateLimited` error is
    /// surfaced unchanged.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.state.wait().await;

            match operation().await {
                Err(Error::RateLimited { period }) if attempt < self.retry_count => {
                    let delay = self.backoff_for(attempt, period);
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        remaining = self.retry_count - attempt,
                        retry_after = ?delay,
                        "Rate limit encountered, pausing before retry"
                    );
                    self.state.block_for(delay);
                }
                Err(e @ Error::RateLimited { .. }) => {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        "Rate limit retries exhausted"
                    );
                    return Err(e);
                }
                other => return other,
            }
        }
    }
}
