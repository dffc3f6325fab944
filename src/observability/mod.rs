//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! fabric + session produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters via the `metrics` facade)
//!
//! Consumers:
//!     → stdout (fmt layer, filtered by RUST_LOG or config)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Library code only emits; installing subscribers/recorders is up to the binary
//! - Without an installed recorder every counter update is a no-op
//! - Label values are static strings, so no allocation per event

pub mod logging;
pub mod metrics;
