//! Resilience layer for an MCP tool server that proxies GitHub project
//! management and AI-assisted content generation.

pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::GatewayConfig;
pub use lifecycle::startup::Gateway;
pub use lifecycle::Shutdown;
pub use resilience::{ExecuteOptions, ExecutionOutcome, ResilientExecutor};
