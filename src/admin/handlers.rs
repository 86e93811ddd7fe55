use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::resilience::{CircuitSnapshot, CircuitState, ProviderFallbackChain};

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub open_circuits: usize,
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub providers: usize,
    pub tracked_circuits: usize,
    pub open_circuits: usize,
}

#[derive(Serialize)]
pub struct ProviderStatus {
    pub id: String,
    pub priority: u32,
    pub capabilities: BTreeSet<String>,
    pub state: CircuitState,
}

/// Configured providers first in fallback order, then any other tracked circuit.
fn circuit_views(state: &AdminState) -> Vec<CircuitSnapshot> {
    let providers = state.providers.load();
    let registry = state.executor.registry();

    let mut views: Vec<CircuitSnapshot> = ProviderFallbackChain::new()
        .ordered(&providers, None)
        .into_iter()
        .map(|p| registry.snapshot_of(&p.id).unwrap_or_else(|| CircuitSnapshot::untouched(p.id.clone())))
        .collect();

    for snapshot in registry.snapshot() {
        if !views.iter().any(|v| v.provider_id == snapshot.provider_id) {
            views.push(snapshot);
        }
    }
    views
}

fn open_count(views: &[CircuitSnapshot]) -> usize {
    views.iter().filter(|v| v.state != CircuitState::Closed).count()
}

pub async fn get_health(State(state): State<AdminState>) -> Json<HealthStatus> {
    let open_circuits = open_count(&circuit_views(&state));
    Json(HealthStatus {
        status: if open_circuits == 0 { "ok" } else { "degraded" },
        open_circuits,
    })
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let views = circuit_views(&state);
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        providers: state.providers.load().len(),
        tracked_circuits: state.executor.registry().len(),
        open_circuits: open_count(&views),
    })
}

pub async fn get_circuits(State(state): State<AdminState>) -> Json<Vec<CircuitSnapshot>> {
    Json(circuit_views(&state))
}

pub async fn get_circuit(
    State(state): State<AdminState>,
    Path(provider_id): Path<String>,
) -> Result<Json<CircuitSnapshot>, StatusCode> {
    circuit_views(&state)
        .into_iter()
        .find(|v| v.provider_id == provider_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_providers(State(state): State<AdminState>) -> Json<Vec<ProviderStatus>> {
    let providers = state.providers.load();
    let statuses = ProviderFallbackChain::new()
        .ordered(&providers, None)
        .into_iter()
        .map(|p| ProviderStatus {
            id: p.id.clone(),
            priority: p.priority,
            capabilities: p.capabilities.clone(),
            state: state.executor.circuit_state(&p.id),
        })
        .collect();
    Json(statuses)
}
