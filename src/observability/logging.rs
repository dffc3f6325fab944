//! Structured logging.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber for the binary
//! - Pick the filter: `RUST_LOG` first, configured level as fallback
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Pretty fmt layer; fields carry ids and statuses, not formatted strings

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(config: &ObservabilityConfig) -> String {
    format!("tagwire={}", config.log_level)
}

/// Install the global subscriber. Call once, from `main`.
pub fn init_logging(config: &ObservabilityConfig) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive(config).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
