use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Backoff {
    /// Every retry waits `initial_delay`.
    Fixed,
    /// Delays grow as `initial_delay * multiplier^(attempt-1)`, capped at
    /// `max_delay`.
    Exponential { multiplier: f64 },
}

/// Per-node retry configuration.
///
/// Controls how many times a node execution may be attempted and how long
/// a failed context waits before becoming eligible again. Flow definitions
/// carry one policy per node; nodes without one use [`RetryPolicy::NONE`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first try.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the delay between retries.
    pub max_delay: Duration,
    /// Strategy for growing the delay.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// No retries: the first failure is final.
    pub const NONE: Self = Self {
        max_attempts: 1,
        initial_delay: Duration::from_secs(0),
        max_delay: Duration::from_secs(0),
        backoff: Backoff::Fixed,
    };

    /// Sensible defaults: 3 attempts, 1s initial delay, exponential 2x
    /// backoff capped at 30s.
    pub const STANDARD: Self = Self {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        backoff: Backoff::Exponential { multiplier: 2.0 },
    };

    /// A policy with the given attempt budget and standard delays.
    pub const fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Exponential { multiplier: 2.0 },
        }
    }

    /// Returns true once `attempts` have consumed the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Delay to wait before the retry following attempt `attempt`
    /// (1-indexed), or `None` when the budget is exhausted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let delay = match self.backoff {
            Backoff::Fixed => self.initial_delay,
            Backoff::Exponential { multiplier } => {
                let exponent = (attempt.saturating_sub(1)) as f64;
                let secs = self.initial_delay.as_secs_f64() * multiplier.powf(exponent);
                Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
            }
        };

        Some(delay)
    }

    /// Timestamp at which a context that just failed attempt `attempt`
    /// becomes eligible again, or `None` when the budget is exhausted.
    pub fn next_eligible(&self, attempt: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let delay = self.delay_for_attempt(attempt)?;
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        Some(now + delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

/// Retry bookkeeping for one context.
///
/// Created on the first failure, mutated on each subsequent one, deleted
/// when the context reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRecord {
    pub context_id: Uuid,
    pub attempts: u32,
    pub next_eligible: DateTime<Utc>,
}

impl RetryRecord {
    pub fn new(context_id: Uuid, attempts: u32, next_eligible: DateTime<Utc>) -> Self {
        Self {
            context_id,
            attempts,
            next_eligible,
        }
    }

    /// Returns true once the backoff window has passed.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.next_eligible <= now
    }
}
