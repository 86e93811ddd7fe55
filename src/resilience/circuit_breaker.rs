//! Circuit breaker for provider protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: provider assumed down, calls fail fast
//! - Half-Open: a single trial call tests recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: cooldown elapsed since opened_at (next before_call)
//! Half-Open → Closed: trial succeeds (consecutive_failures reset)
//! Half-Open → Open: trial fails (opened_at reset)
//! ```
//!
//! # Design Decisions
//! - One record per provider, created lazily, guarded by its own mutex
//! - The registry map only hands out records; it is never held while a
//!   record is locked, so independent providers do not contend
//! - Outcomes reported while Open came from calls admitted before the trip
//!   and are ignored
//! - Only the probe's own outcome settles a Half-Open trial; late outcomes
//!   from calls admitted while Closed are ignored there too
//! - A trial whose outcome never arrives is considered abandoned after one
//!   cooldown, and the next caller gets a fresh probe

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::ResilienceConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Why a call was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Circuit open and cooldown not yet elapsed.
    Open,
    /// Half-open with a trial already in flight.
    Probing,
}

/// Result of asking the breaker for permission to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallGate {
    Allowed,
    /// This call is the half-open trial; its outcome must be recorded.
    Probe,
    Blocked(BlockReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl From<&ResilienceConfig> for BreakerSettings {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            cooldown: config.cooldown(),
        }
    }
}

/// Breaker state for one provider.
#[derive(Debug)]
pub struct CircuitBreakerRecord {
    provider_id: String,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_trial_in_flight: bool,
    trial_started_at: Option<Instant>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreakerRecord {
    pub fn new(provider_id: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            provider_id: provider_id.into(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_trial_in_flight: false,
            trial_started_at: None,
            failure_threshold: settings.failure_threshold.max(1),
            cooldown: settings.cooldown,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    pub fn trial_in_flight(&self) -> bool {
        self.half_open_trial_in_flight
    }

    fn apply_settings(&mut self, settings: BreakerSettings) {
        self.failure_threshold = settings.failure_threshold.max(1);
        self.cooldown = settings.cooldown;
    }

    fn begin_trial(&mut self, now: Instant) {
        self.half_open_trial_in_flight = true;
        self.trial_started_at = Some(now);
    }

    fn end_trial(&mut self) {
        self.half_open_trial_in_flight = false;
        self.trial_started_at = None;
    }

    /// Gate a call. Returns the gate and the new state if it changed.
    pub fn admit(&mut self, now: Instant) -> (CallGate, Option<CircuitState>) {
        match self.state {
            CircuitState::Closed => (CallGate::Allowed, None),
            CircuitState::Open => {
                let cooled = self
                    .opened_at
                    .map(|opened| now.saturating_duration_since(opened) >= self.cooldown)
                    .unwrap_or(true);
                if !cooled {
                    return (CallGate::Blocked(BlockReason::Open), None);
                }
                self.state = CircuitState::HalfOpen;
                self.begin_trial(now);
                (CallGate::Probe, Some(CircuitState::HalfOpen))
            }
            CircuitState::HalfOpen => {
                let abandoned = self
                    .trial_started_at
                    .map(|started| now.saturating_duration_since(started) >= self.cooldown)
                    .unwrap_or(true);
                if self.half_open_trial_in_flight && !abandoned {
                    return (CallGate::Blocked(BlockReason::Probing), None);
                }
                self.begin_trial(now);
                (CallGate::Probe, None)
            }
        }
    }

    /// Record the outcome of a call admitted as `CallGate::Allowed`.
    /// Returns the new state if it changed.
    pub fn record(&mut self, success: bool, now: Instant) -> Option<CircuitState> {
        match (self.state, success) {
            (CircuitState::Closed, true) => {
                self.consecutive_failures = 0;
                None
            }
            (CircuitState::Closed, false) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= self.failure_threshold {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(now);
                    return Some(CircuitState::Open);
                }
                None
            }
            (CircuitState::Open, _) | (CircuitState::HalfOpen, _) => None,
        }
    }

    /// Record the outcome of the half-open trial admitted as `CallGate::Probe`.
    pub fn record_trial(&mut self, success: bool, now: Instant) -> Option<CircuitState> {
        if self.state != CircuitState::HalfOpen {
            return self.record(success, now);
        }

        self.end_trial();
        if success {
            self.state = CircuitState::Closed;
            self.consecutive_failures = 0;
            self.opened_at = None;
            Some(CircuitState::Closed)
        } else {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
            Some(CircuitState::Open)
        }
    }

    fn snapshot(&self, now: Instant) -> CircuitSnapshot {
        CircuitSnapshot {
            provider_id: self.provider_id.clone(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            opened_for_ms: self
                .opened_at
                .map(|opened| now.saturating_duration_since(opened).as_millis() as u64),
            trial_in_flight: self.half_open_trial_in_flight,
        }
    }
}

/// Read-only view of a record, for health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub provider_id: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_for_ms: Option<u64>,
    pub trial_in_flight: bool,
}

impl CircuitSnapshot {
    /// View of a provider that has not been called yet.
    pub fn untouched(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_for_ms: None,
            trial_in_flight: false,
        }
    }
}

/// Registry of circuit breaker records keyed by provider id.
///
/// Owned by the composition root and shared by reference.
#[derive(Debug)]
pub struct CircuitRegistry {
    records: DashMap<String, Arc<Mutex<CircuitBreakerRecord>>>,
    settings: ArcSwap<BreakerSettings>,
}

fn lock(record: &Mutex<CircuitBreakerRecord>) -> MutexGuard<'_, CircuitBreakerRecord> {
    record.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CircuitRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            records: DashMap::new(),
            settings: ArcSwap::from_pointee(settings),
        }
    }

    pub fn settings(&self) -> BreakerSettings {
        **self.settings.load()
    }

    fn record_for(&self, provider_id: &str) -> Arc<Mutex<CircuitBreakerRecord>> {
        if let Some(existing) = self.records.get(provider_id) {
            return existing.value().clone();
        }
        let settings = self.settings();
        self.records
            .entry(provider_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitBreakerRecord::new(provider_id, settings))))
            .value()
            .clone()
    }

    /// Ask permission to call `provider_id`.
    pub fn before_call(&self, provider_id: &str) -> CallGate {
        let record = self.record_for(provider_id);
        let (gate, transition) = lock(&record).admit(Instant::now());

        if let Some(state) = transition {
            tracing::info!(provider = %provider_id, state = state.as_str(), "Circuit cooldown elapsed, probing");
            metrics::record_circuit_transition(provider_id, state);
        }
        if let CallGate::Blocked(reason) = gate {
            tracing::debug!(provider = %provider_id, reason = ?reason, "Call blocked by circuit");
        }
        gate
    }

    /// Record the outcome of a call admitted as `CallGate::Allowed`.
    pub fn record_outcome(&self, provider_id: &str, success: bool) {
        self.settle(provider_id, success, false);
    }

    /// Record the outcome of a call admitted as `CallGate::Probe`.
    pub fn record_probe_outcome(&self, provider_id: &str, success: bool) {
        self.settle(provider_id, success, true);
    }

    /// Record an outcome against the gate the call was admitted with.
    pub fn record_gated(&self, provider_id: &str, gate: CallGate, success: bool) {
        match gate {
            CallGate::Probe => self.record_probe_outcome(provider_id, success),
            CallGate::Allowed => self.record_outcome(provider_id, success),
            CallGate::Blocked(_) => {}
        }
    }

    fn settle(&self, provider_id: &str, success: bool, probe: bool) {
        let record = self.record_for(provider_id);
        let (transition, failures) = {
            let mut guard = lock(&record);
            let now = Instant::now();
            let transition = if probe {
                guard.record_trial(success, now)
            } else {
                guard.record(success, now)
            };
            (transition, guard.consecutive_failures())
        };

        match transition {
            Some(CircuitState::Open) => {
                tracing::warn!(provider = %provider_id, consecutive_failures = failures, "Circuit opened");
            }
            Some(state) => {
                tracing::info!(provider = %provider_id, state = state.as_str(), "Circuit recovered");
            }
            None => {}
        }
        if let Some(state) = transition {
            metrics::record_circuit_transition(provider_id, state);
        }
    }

    /// Current state without side effects. Unknown providers read as Closed.
    pub fn state(&self, provider_id: &str) -> CircuitState {
        let record = match self.records.get(provider_id) {
            Some(entry) => entry.value().clone(),
            None => return CircuitState::Closed,
        };
        let state = lock(&record).state();
        state
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let records: Vec<_> = self.records.iter().map(|entry| entry.value().clone()).collect();
        let now = Instant::now();
        let mut snapshots: Vec<_> = records.iter().map(|record| lock(record).snapshot(now)).collect();
        snapshots.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        snapshots
    }

    pub fn snapshot_of(&self, provider_id: &str) -> Option<CircuitSnapshot> {
        let record = self.records.get(provider_id).map(|entry| entry.value().clone())?;
        let snapshot = lock(&record).snapshot(Instant::now());
        Some(snapshot)
    }

    /// Apply new threshold and cooldown to every record, keeping state.
    pub fn reconfigure(&self, settings: BreakerSettings) {
        self.settings.store(Arc::new(settings));
        let records: Vec<_> = self.records.iter().map(|entry| entry.value().clone()).collect();
        for record in records {
            lock(&record).apply_settings(settings);
        }
        tracing::info!(
            failure_threshold = settings.failure_threshold,
            cooldown_ms = settings.cooldown.as_millis() as u64,
            "Circuit settings updated"
        );
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}
