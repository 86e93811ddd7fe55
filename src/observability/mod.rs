//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Resilience layer produces:
//!     → logging.rs (structured log events, one span per logical call)
//!     → metrics.rs (attempts, retries, fallbacks, circuit transitions)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - A call id flows through every event of a logical call
//! - Metrics are cheap; recording without an installed exporter is a no-op

pub mod logging;
pub mod metrics;
