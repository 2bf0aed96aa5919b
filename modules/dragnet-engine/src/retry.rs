//! Failure classification and backoff policy.
//!
//! `Blocked` and `NotFound` are permanent: no amount of retrying changes an
//! IP block or a missing document. `Transient` retries with capped
//! exponential backoff plus jitter. `InvalidContent` retries exactly once to
//! rule out a transient parse race, then goes permanent.

use std::time::Duration;

use rand::Rng;

use dragnet_common::{Config, FailureKind};

/// How a failure kind responds to retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    Permanent,
}

/// What the scheduler should do with a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Fail,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    /// Total fetch attempts allowed per item, first attempt included.
    budget: u32,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, budget: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            budget: budget.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.retry_base_delay,
            config.retry_max_delay,
            config.retry_budget,
        )
    }

    pub fn classify(&self, kind: FailureKind) -> Classification {
        match kind {
            FailureKind::Blocked | FailureKind::NotFound => Classification::Permanent,
            FailureKind::Transient | FailureKind::InvalidContent => Classification::Retryable,
        }
    }

    /// Decide retry vs. abort for an item that has already made
    /// `attempt_count` fetch attempts.
    pub fn decide(&self, kind: FailureKind, attempt_count: u32) -> RetryDecision {
        if self.classify(kind) == Classification::Permanent {
            return RetryDecision::Fail;
        }
        if attempt_count >= self.budget {
            return RetryDecision::Fail;
        }
        // InvalidContent gets exactly one re-attempt regardless of budget.
        if kind == FailureKind::InvalidContent && attempt_count >= 2 {
            return RetryDecision::Fail;
        }
        RetryDecision::RetryAfter(self.backoff_delay(attempt_count))
    }

    /// base * 2^(attempt-1), capped, plus 0–250ms jitter so a burst of
    /// failures does not re-attempt in lockstep.
    fn backoff_delay(&self, attempt_count: u32) -> Duration {
        let exp = attempt_count.saturating_sub(1).min(16);
        let scaled = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay);
        let jitter = Duration::from_millis(rand::rng().random_range(0..250));
        scaled + jitter
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }
}
