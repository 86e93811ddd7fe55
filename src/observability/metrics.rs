//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_attempts_total` (counter): op invocations by provider, kind
//! - `resilience_retries_total` (counter): same-provider retries
//! - `resilience_fallbacks_total` (counter): advances away from a provider
//! - `resilience_circuit_transitions_total` (counter): by provider, target state
//! - `resilience_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `resilience_call_duration_seconds` (histogram): logical call latency by outcome

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::CircuitState;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_attempt(provider: &str, kind: &'static str) {
    ::metrics::counter!("resilience_attempts_total", "provider" => provider.to_string(), "kind" => kind)
        .increment(1);
}

pub fn record_retry(provider: &str) {
    ::metrics::counter!("resilience_retries_total", "provider" => provider.to_string()).increment(1);
}

pub fn record_fallback(from: &str) {
    ::metrics::counter!("resilience_fallbacks_total", "from" => from.to_string()).increment(1);
}

pub fn record_circuit_transition(provider: &str, to: CircuitState) {
    ::metrics::counter!(
        "resilience_circuit_transitions_total",
        "provider" => provider.to_string(),
        "to" => to.as_str()
    )
    .increment(1);

    let value = match to {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    ::metrics::gauge!("resilience_circuit_state", "provider" => provider.to_string()).set(value);
}

pub fn record_call(outcome: &'static str, elapsed: Duration) {
    ::metrics::histogram!("resilience_call_duration_seconds", "outcome" => outcome)
        .record(elapsed.as_secs_f64());
}
