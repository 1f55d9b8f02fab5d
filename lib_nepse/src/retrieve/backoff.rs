//! # Bounded Exponential Backoff
//!
//! Attempt budget and delay schedule for the dispatcher's retry loop. Delays
//! come from `reqwest_retry`'s jittered exponential policy; the attempt budget
//! is enforced here so callers can count attempts exactly.

use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::{Jitter, RetryDecision, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Retry budget as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Total attempts per logical request, the first one included.
    pub max_attempts: u32,
    /// Lower bound of the delay before a retry.
    pub min_delay_ms: u64,
    /// Upper bound of the delay before a retry.
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

impl RetrySettings {
    pub fn new(max_attempts: u32, min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            min_delay_ms,
            max_delay_ms,
        }
    }

    /// Clamps the settings into a usable schedule: at least one attempt, a
    /// non-zero lower bound and an upper bound no smaller than it.
    pub fn backoff(&self) -> Backoff {
        let max_attempts = self.max_attempts.max(1);
        let min = Duration::from_millis(self.min_delay_ms.max(1));
        let max = Duration::from_millis(self.max_delay_ms).max(min);
        let policy = ExponentialBackoff::builder()
            .retry_bounds(min, max)
            .jitter(Jitter::Bounded)
            .build_with_max_retries(max_attempts - 1);
        Backoff {
            policy,
            max_attempts,
            started: SystemTime::now(),
        }
    }
}

/// Delay schedule for one logical request.
#[derive(Debug)]
pub struct Backoff {
    policy: ExponentialBackoff,
    max_attempts: u32,
    started: SystemTime,
}

impl Backoff {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after `failed_attempts` consecutive failures, or `None`
    /// once the budget is spent.
    pub fn delay_after(&self, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts == 0 || failed_attempts >= self.max_attempts {
            return None;
        }
        match self.policy.should_retry(self.started, failed_attempts - 1) {
            RetryDecision::Retry { execute_after } => Some(
                execute_after
                    .duration_since(SystemTime::now())
                    .unwrap_or_default(),
            ),
            RetryDecision::DoNotRetry => None,
        }
    }
}
