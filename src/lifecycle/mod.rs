//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Build circuit registry → Build executor → Admin state
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Broadcast → Admin API drains → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - The circuit registry is built once here and injected, never global
//! - Config reloads reuse the same registry so circuit state survives

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
