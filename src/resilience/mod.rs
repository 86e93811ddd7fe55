//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call to a provider (GitHub API, AI model):
//!     → executor.rs (pick provider, gate on circuit, invoke op)
//!     → On failure: classifier.rs (raw failure → FailureKind)
//!     → retries.rs (retry now, retry after delay, or stop)
//!     → backoff.rs (exponential + full jitter, or server hint)
//!     → circuit_breaker.rs (record outcome, open circuit if threshold exceeded)
//!     → fallback.rs (next provider by priority when the current one is done)
//! ```
//!
//! # Design Decisions
//! - FailureKind is the single source of truth for retry eligibility
//! - Circuit state is per provider; the registry is injected, never global
//! - Terminal failures never fall back to another provider
//! - Only the backoff sleep suspends, and it is cancellable

pub mod backoff;
pub mod circuit_breaker;
pub mod classifier;
pub mod executor;
pub mod fallback;
pub mod retries;
pub mod upstream;

pub use backoff::BackoffCalculator;
pub use circuit_breaker::{BlockReason, BreakerSettings, CallGate, CircuitRegistry, CircuitSnapshot, CircuitState};
pub use classifier::{classify, FailureKind, NetworkErrorKind, RawFailure, ServerHint};
pub use executor::{ExecuteOptions, ExecutionFailure, ExecutionOutcome, OutcomeKind, ResilientExecutor};
pub use fallback::{ProviderDescriptor, ProviderFallbackChain};
pub use retries::{RetryAttempt, RetryDecision, RetryPolicy, StopReason};
