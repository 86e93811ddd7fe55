//! Retry decisions.
//!
//! # Responsibilities
//! - Decide between "retry" and "stop" for a classified failure
//! - Describe each failed attempt for logging (`RetryAttempt`)
//!
//! # Design Decisions
//! - Terminal kinds stop before anything else is considered
//! - An open circuit stops without burning an attempt
//! - The decision is pure; sleeping belongs to the executor

use std::time::Duration;

use serde::Serialize;

use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::classifier::{FailureKind, ServerHint};

/// Why the policy stopped retrying against the current provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// InvalidRequest, NotFound, Unauthorized. No fallback either.
    TerminalFailure,
    /// Unclassifiable failure; not retried against the same provider.
    NotRetryable,
    /// Attempt budget for this provider used up.
    AttemptsExhausted,
    /// The provider's circuit is open.
    CircuitOpen,
}

impl StopReason {
    /// Whether another provider may still be tried.
    pub fn allows_fallback(self) -> bool {
        self != StopReason::TerminalFailure
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay_hint: Option<ServerHint> },
    Stop(StopReason),
}

/// Retry policy for a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn decide(
        &self,
        kind: FailureKind,
        attempt_number: u32,
        circuit_state: CircuitState,
        delay_hint: Option<ServerHint>,
    ) -> RetryDecision {
        if kind.is_terminal() {
            return RetryDecision::Stop(StopReason::TerminalFailure);
        }
        if !kind.is_retryable() {
            return RetryDecision::Stop(StopReason::NotRetryable);
        }
        if attempt_number >= self.max_attempts {
            return RetryDecision::Stop(StopReason::AttemptsExhausted);
        }
        if circuit_state == CircuitState::Open {
            return RetryDecision::Stop(StopReason::CircuitOpen);
        }
        RetryDecision::Retry { delay_hint }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// One failed attempt within a logical call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryAttempt {
    /// 1-based, per provider.
    pub attempt_number: u32,
    pub provider_id: String,
    pub kind: FailureKind,
    /// Computed even when the attempt was the last one.
    pub delay_before_next: Duration,
    pub elapsed_since_start: Duration,
}
