// Copyright (c) 2025 - Cowboy AI, Inc.
//! Retry with exponential backoff
//!
//! Network failures are the one error kind the sync managers recover
//! from locally. The policy: base delay 1 s, factor 2, capped at 5 min,
//! at most 10 attempts. Everything non-retryable propagates on the
//! first occurrence.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::errors::{EngineError, EngineResult};

/// Exponential backoff parameters
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base: Duration,
    /// Multiplier applied per attempt
    pub factor: u32,
    /// Upper bound on any single delay
    pub cap: Duration,
    /// Total attempts, including the first
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(5 * 60),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.factor.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Run an operation, retrying retryable failures per this policy
    pub async fn retry<T, F, Fut>(&self, mut operation: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay(attempt);
                    warn!(%err, attempt, delay_ms = delay.as_millis() as u64, "retrying after transient failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
