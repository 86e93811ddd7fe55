//! Resilient execution of calls against interchangeable providers.
//!
//! # Responsibilities
//! - Gate every invocation on the provider's circuit
//! - Classify failures, retry with backoff, fall back to the next provider
//! - Honor the caller's deadline and cancellation token at every wait point
//! - Report a structured outcome the tool layer can turn into a message
//!
//! # Design Decisions
//! - Attempts are counted per provider; `attempts_made` counts invocations
//! - Terminal failures return immediately, without fallback
//! - A delay above `max_sleep_per_attempt` moves on to the next provider
//! - A running op is never interrupted; it must honor the deadline itself

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ResilienceConfig;
use crate::observability::metrics;
use crate::resilience::backoff::BackoffCalculator;
use crate::resilience::circuit_breaker::{BlockReason, BreakerSettings, CallGate, CircuitRegistry, CircuitState};
use crate::resilience::classifier::{classify, FailureKind, RawFailure};
use crate::resilience::fallback::{ProviderDescriptor, ProviderFallbackChain};
use crate::resilience::retries::{RetryAttempt, RetryDecision, RetryPolicy, StopReason};

/// Why a logical call did not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// The last classified failure.
    Failure(FailureKind),
    /// Every remaining provider had an open circuit.
    CircuitOpen,
    /// Every remaining provider was half-open with a trial in flight.
    CircuitProbing,
    Cancelled,
    DeadlineExceeded,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Failure(kind) => kind.as_str(),
            OutcomeKind::CircuitOpen => "circuit_open",
            OutcomeKind::CircuitProbing => "circuit_probing",
            OutcomeKind::Cancelled => "cancelled",
            OutcomeKind::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final, unrecoverable failure of a logical call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ExecutionFailure {
    pub kind: OutcomeKind,
    pub message: String,
    pub provider_id: Option<String>,
}

impl ExecutionFailure {
    pub fn new(kind: OutcomeKind, message: impl Into<String>, provider_id: Option<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider_id,
        }
    }

    /// The request itself was rejected; another provider would not help.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, OutcomeKind::Failure(kind) if kind.is_terminal())
    }

    /// The caller's cancellation or deadline stopped the call.
    pub fn is_interrupted(&self) -> bool {
        matches!(self.kind, OutcomeKind::Cancelled | OutcomeKind::DeadlineExceeded)
    }

    /// Every eligible provider was tried or blocked.
    pub fn is_exhausted(&self) -> bool {
        !self.is_terminal() && !self.is_interrupted()
    }
}

/// Result of `ResilientExecutor::execute`.
#[derive(Debug)]
pub struct ExecutionOutcome<T> {
    pub result: Result<T, ExecutionFailure>,
    /// Provider that produced the value.
    pub provider_id: Option<String>,
    /// Invocations of the op across all providers.
    pub attempts_made: u32,
    pub total_elapsed: Duration,
    /// Some provider's circuit was open during this call.
    pub circuit_tripped: bool,
    /// Every failed attempt, in order.
    pub attempts: Vec<RetryAttempt>,
}

impl<T> ExecutionOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&ExecutionFailure> {
        self.result.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, ExecutionFailure> {
        self.result
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub required_capability: Option<String>,
    pub deadline: Option<Instant>,
    pub cancel: Option<CancellationToken>,
    pub max_attempts_per_provider: Option<u32>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.required_capability = Some(tag.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts_per_provider = Some(max_attempts);
        self
    }
}

/// Bookkeeping for one logical call.
struct CallState {
    start: Instant,
    attempts_made: u32,
    circuit_tripped: bool,
    attempts: Vec<RetryAttempt>,
}

impl CallState {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            attempts_made: 0,
            circuit_tripped: false,
            attempts: Vec::new(),
        }
    }

    fn finish<T>(self, result: Result<T, ExecutionFailure>, provider_id: Option<String>) -> ExecutionOutcome<T> {
        let total_elapsed = self.start.elapsed();
        let label = match &result {
            Ok(_) => "success",
            Err(failure) => failure.kind.as_str(),
        };
        metrics::record_call(label, total_elapsed);

        ExecutionOutcome {
            result,
            provider_id,
            attempts_made: self.attempts_made,
            total_elapsed,
            circuit_tripped: self.circuit_tripped,
            attempts: self.attempts,
        }
    }

    fn fail<T>(self, failure: ExecutionFailure) -> ExecutionOutcome<T> {
        self.finish(Err(failure), None)
    }
}

/// The orchestrator callers invoke for every outbound provider call.
#[derive(Debug)]
pub struct ResilientExecutor {
    registry: Arc<CircuitRegistry>,
    config: ArcSwap<ResilienceConfig>,
    fallback: ProviderFallbackChain,
}

impl ResilientExecutor {
    pub fn new(registry: Arc<CircuitRegistry>, config: ResilienceConfig) -> Self {
        Self {
            registry,
            config: ArcSwap::from_pointee(config),
            fallback: ProviderFallbackChain::new(),
        }
    }

    pub fn registry(&self) -> &Arc<CircuitRegistry> {
        &self.registry
    }

    pub fn config(&self) -> Arc<ResilienceConfig> {
        self.config.load_full()
    }

    /// Read-only circuit introspection for health checks.
    pub fn circuit_state(&self, provider_id: &str) -> CircuitState {
        self.registry.state(provider_id)
    }

    /// Swap settings for subsequent calls; circuit state is kept.
    pub fn update_config(&self, config: ResilienceConfig) {
        self.registry.reconfigure(BreakerSettings::from(&config));
        self.config.store(Arc::new(config));
    }

    /// Run `op` against `providers` with classification, retry, circuit
    /// breaking and fallback.
    pub async fn execute<T, F, Fut>(
        &self,
        providers: &[ProviderDescriptor],
        options: ExecuteOptions,
        op: F,
    ) -> ExecutionOutcome<T>
    where
        F: FnMut(ProviderDescriptor) -> Fut,
        Fut: Future<Output = Result<T, RawFailure>>,
    {
        let span = tracing::info_span!("resilient_call", call_id = %Uuid::new_v4());
        self.run(providers, options, op).instrument(span).await
    }

    async fn run<T, F, Fut>(
        &self,
        providers: &[ProviderDescriptor],
        options: ExecuteOptions,
        mut op: F,
    ) -> ExecutionOutcome<T>
    where
        F: FnMut(ProviderDescriptor) -> Fut,
        Fut: Future<Output = Result<T, RawFailure>>,
    {
        let config = self.config.load_full();
        let mut call = CallState::new();

        let max_attempts = options
            .max_attempts_per_provider
            .unwrap_or(config.max_attempts_per_provider)
            .max(1);
        let policy = RetryPolicy::new(max_attempts);
        let backoff = BackoffCalculator::from_config(&config);
        let max_sleep = config.max_sleep_per_attempt();
        let deadline = options
            .deadline
            .or_else(|| config.default_deadline().map(|timeout| call.start + timeout));
        let capability = options.required_capability.as_deref();
        let cancel = options.cancel.as_ref();

        let mut tried: HashSet<String> = HashSet::new();
        let mut last_failure: Option<ExecutionFailure> = None;
        let mut saw_probing = false;

        let mut provider = match self.fallback.next(&tried, providers, capability) {
            Some(provider) => provider,
            None => {
                let message = match capability {
                    Some(tag) if !providers.is_empty() => format!("no providers with capability '{}'", tag),
                    _ => "no providers configured".to_string(),
                };
                return call.fail(ExecutionFailure::new(
                    OutcomeKind::Failure(FailureKind::Unknown),
                    message,
                    None,
                ));
            }
        };

        loop {
            let mut attempt: u32 = 0;

            loop {
                if let Some(kind) = interruption(cancel, deadline) {
                    return call.fail(interrupted(kind, &provider.id));
                }

                let gate = self.registry.before_call(&provider.id);
                if let CallGate::Blocked(reason) = gate {
                    match reason {
                        BlockReason::Open => call.circuit_tripped = true,
                        BlockReason::Probing => saw_probing = true,
                    }
                    break;
                }

                attempt += 1;
                call.attempts_made += 1;

                let raw = match op(provider.clone()).await {
                    Ok(value) => {
                        self.registry.record_gated(&provider.id, gate, true);
                        metrics::record_attempt(&provider.id, "success");
                        tracing::debug!(provider = %provider.id, attempt, "Call succeeded");
                        let provider_id = Some(provider.id.clone());
                        return call.finish(Ok(value), provider_id);
                    }
                    Err(raw) => raw,
                };

                let kind = classify(&raw);
                metrics::record_attempt(&provider.id, kind.as_str());
                self.registry.record_gated(&provider.id, gate, false);

                let state = self.registry.state(&provider.id);
                if state == CircuitState::Open {
                    call.circuit_tripped = true;
                }

                let hint = raw.server_hint();
                let decision = policy.decide(kind, attempt, state, hint);
                let delay = backoff.compute_delay(attempt, kind, hint.as_ref());

                call.attempts.push(RetryAttempt {
                    attempt_number: attempt,
                    provider_id: provider.id.clone(),
                    kind,
                    delay_before_next: delay,
                    elapsed_since_start: call.start.elapsed(),
                });
                let failure = ExecutionFailure::new(
                    OutcomeKind::Failure(kind),
                    raw.message.clone(),
                    Some(provider.id.clone()),
                );

                if !matches!(decision, RetryDecision::Stop(StopReason::TerminalFailure)) {
                    last_failure = Some(failure.clone());
                }

                match decision {
                    RetryDecision::Retry { .. } => {
                        if delay > max_sleep {
                            tracing::warn!(
                                provider = %provider.id,
                                delay_ms = delay.as_millis() as u64,
                                max_sleep_ms = max_sleep.as_millis() as u64,
                                "Requested delay too long, treating provider as unavailable"
                            );
                            break;
                        }

                        tracing::info!(
                            provider = %provider.id,
                            attempt,
                            kind = %kind,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying call"
                        );
                        metrics::record_retry(&provider.id);

                        if let Err(kind) = pause(delay, cancel, deadline).await {
                            return call.fail(interrupted(kind, &provider.id));
                        }
                    }
                    RetryDecision::Stop(StopReason::TerminalFailure) => {
                        tracing::warn!(provider = %provider.id, kind = %kind, error = %raw.message, "Terminal failure");
                        return call.fail(failure);
                    }
                    RetryDecision::Stop(reason) => {
                        tracing::debug!(provider = %provider.id, reason = ?reason, "Stopped retrying provider");
                        break;
                    }
                }
            }

            tried.insert(provider.id.clone());

            match self.fallback.next(&tried, providers, capability) {
                Some(next) => {
                    tracing::warn!(from = %provider.id, to = %next.id, "Falling back to next provider");
                    metrics::record_fallback(&provider.id);
                    provider = next;
                }
                None => {
                    let failure = exhausted(last_failure, saw_probing);
                    tracing::warn!(kind = %failure.kind, attempts = call.attempts_made, "All providers exhausted");
                    return call.fail(failure);
                }
            }
        }
    }
}

fn interruption(cancel: Option<&CancellationToken>, deadline: Option<Instant>) -> Option<OutcomeKind> {
    if cancel.map_or(false, CancellationToken::is_cancelled) {
        return Some(OutcomeKind::Cancelled);
    }
    if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
        return Some(OutcomeKind::DeadlineExceeded);
    }
    None
}

fn interrupted(kind: OutcomeKind, provider_id: &str) -> ExecutionFailure {
    let message = match kind {
        OutcomeKind::Cancelled => "call cancelled by caller",
        _ => "deadline exceeded",
    };
    ExecutionFailure::new(kind, message, Some(provider_id.to_string()))
}

/// Sleep for `delay` unless cancelled; refuse to sleep past the deadline.
async fn pause(
    delay: Duration,
    cancel: Option<&CancellationToken>,
    deadline: Option<Instant>,
) -> Result<(), OutcomeKind> {
    if let Some(kind) = interruption(cancel, deadline) {
        return Err(kind);
    }
    if let Some(deadline) = deadline {
        match Instant::now().checked_add(delay) {
            Some(wake) if wake <= deadline => {}
            _ => return Err(OutcomeKind::DeadlineExceeded),
        }
    }

    match cancel {
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(OutcomeKind::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        },
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

/// A probe in flight anywhere means the caller may retry shortly, so it
/// outranks open circuits when nothing was invoked.
fn exhausted(last_failure: Option<ExecutionFailure>, saw_probing: bool) -> ExecutionFailure {
    match last_failure {
        Some(failure) => ExecutionFailure::new(
            failure.kind,
            format!("all providers exhausted: {}", failure.message),
            failure.provider_id,
        ),
        None if saw_probing => ExecutionFailure::new(
            OutcomeKind::CircuitProbing,
            "all providers unavailable: circuit probing",
            None,
        ),
        None => ExecutionFailure::new(
            OutcomeKind::CircuitOpen,
            "all providers unavailable: circuit open",
            None,
        ),
    }
}
