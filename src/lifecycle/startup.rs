//! Startup orchestration: the composition root for the resilience layer.

use std::sync::Arc;

use crate::admin::AdminState;
use crate::config::GatewayConfig;
use crate::resilience::{BreakerSettings, CircuitRegistry, ResilientExecutor};

/// Everything built from one configuration.
pub struct Gateway {
    pub registry: Arc<CircuitRegistry>,
    pub executor: Arc<ResilientExecutor>,
    pub admin: AdminState,
}

impl Gateway {
    pub fn build(config: &GatewayConfig) -> Self {
        let registry = Arc::new(CircuitRegistry::new(BreakerSettings::from(&config.resilience)));
        let executor = Arc::new(ResilientExecutor::new(registry.clone(), config.resilience.clone()));
        let admin = AdminState::new(executor.clone(), config.providers.clone(), config.admin.api_key.clone());

        tracing::info!(
            providers = config.providers.len(),
            failure_threshold = config.resilience.failure_threshold,
            max_attempts = config.resilience.max_attempts_per_provider,
            "Resilience layer initialized"
        );

        Self {
            registry,
            executor,
            admin,
        }
    }

    /// Apply a reloaded configuration without discarding circuit state.
    pub fn apply(&self, config: &GatewayConfig) {
        self.executor.update_config(config.resilience.clone());
        self.admin.providers.store(Arc::new(config.providers.clone()));
        self.admin.api_key.store(Arc::new(config.admin.api_key.clone()));
        tracing::info!(providers = config.providers.len(), "Configuration applied");
    }
}
