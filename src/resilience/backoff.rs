//! Exponential backoff with full jitter.

use std::time::{Duration, SystemTime};

use rand::Rng;

use crate::config::ResilienceConfig;
use crate::resilience::classifier::{FailureKind, ServerHint};

/// Computes the delay before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffCalculator {
    base: Duration,
    max: Duration,
}

impl BackoffCalculator {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay())
    }

    /// Unjittered delay for `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let exponential_base = 2u64.saturating_pow(attempt - 1);
        let delay_ms = base_ms.saturating_mul(exponential_base);

        Duration::from_millis(delay_ms.min(max_ms))
    }

    /// Delay before the attempt after `attempt`.
    ///
    /// A rate-limited failure with a server hint waits exactly as long as the
    /// server asked, overriding the exponential schedule.
    pub fn compute_delay(&self, attempt: u32, kind: FailureKind, hint: Option<&ServerHint>) -> Duration {
        self.compute_delay_at(attempt, kind, hint, SystemTime::now())
    }

    pub(crate) fn compute_delay_at(
        &self,
        attempt: u32,
        kind: FailureKind,
        hint: Option<&ServerHint>,
        now: SystemTime,
    ) -> Duration {
        if kind == FailureKind::RateLimited {
            if let Some(hint) = hint {
                return hint.delay_from(now);
            }
        }

        full_jitter(self.ceiling(attempt))
    }
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(10))
    }
}

/// Uniform sample in `[0, ceiling]`.
fn full_jitter(ceiling: Duration) -> Duration {
    let ceiling_ms = ceiling.as_millis() as u64;
    if ceiling_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
}
