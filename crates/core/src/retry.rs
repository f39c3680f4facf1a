// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry policy with exponential backoff and jitter.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Explicit retry policy carried into every retry loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Jitter fraction in [0, 1]; the computed delay is scaled by a random
    /// factor in [1 - jitter, 1 + jitter].
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the given attempt (1-based; attempt 1 has no
    /// preceding delay).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(2).min(16);
        let raw = self.base_delay_ms.saturating_mul(1u64 << exp);
        let capped = raw.min(self.max_delay_ms);
        Duration::from_millis(apply_jitter(capped, self.jitter))
    }

    /// True if another attempt is allowed after `attempt` attempts failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

fn apply_jitter(ms: u64, jitter: f64) -> u64 {
    if jitter <= 0.0 || ms == 0 {
        return ms;
    }
    use rand::Rng;
    let mut rng = rand::rng();
    let factor = 1.0 + rng.random_range(-jitter..=jitter);
    ((ms as f64) * factor).max(0.0) as u64
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
