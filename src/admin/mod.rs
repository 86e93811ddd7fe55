//! Admin API: health and circuit introspection.
//!
//! # Routes
//! - `GET /health` (no auth): liveness plus open-circuit count
//! - `GET /admin/status`
//! - `GET /admin/circuits`, `GET /admin/circuits/{provider_id}`
//! - `GET /admin/providers`
//!
//! Every `/admin` route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::resilience::{ProviderDescriptor, ResilientExecutor};

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub executor: Arc<ResilientExecutor>,
    pub providers: Arc<ArcSwap<Vec<ProviderDescriptor>>>,
    pub api_key: Arc<ArcSwap<String>>,
}

impl AdminState {
    pub fn new(executor: Arc<ResilientExecutor>, providers: Vec<ProviderDescriptor>, api_key: String) -> Self {
        Self {
            executor,
            providers: Arc::new(ArcSwap::from_pointee(providers)),
            api_key: Arc::new(ArcSwap::from_pointee(api_key)),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    let admin = Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/circuits", get(get_circuits))
        .route("/admin/circuits/{provider_id}", get(get_circuit))
        .route("/admin/providers", get(get_providers))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .route("/health", get(get_health))
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until the shutdown signal fires.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API starting");

    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
