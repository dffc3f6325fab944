//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes > 0, timeouts > 0)
//! - Check that feature names and log levels are known
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SessionConfig → Result<(), Vec<ValidationError>>
//! - Contexts only check the fabric sections, so demo or logging settings
//!   never stop a session from starting

use std::net::SocketAddr;

use crate::config::schema::{DemoConfig, ObservabilityConfig, SessionConfig, WorkerConfig};
use crate::fabric::context::Features;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every problem found.
///
/// The `demo` section is left to `validate_demo`, which runs once
/// command-line overrides have been applied.
pub fn validate_config(config: &SessionConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_fabric(config, &mut errors);
    check_observability(&config.observability, &mut errors);
    into_result(errors)
}

/// Validate only what a context and its workers consume: the `context`,
/// `worker` and `endpoint` sections.
pub fn validate_fabric(config: &SessionConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_fabric(config, &mut errors);
    into_result(errors)
}

/// Validate demo settings against the worker limits they must fit in.
pub fn validate_demo(demo: &DemoConfig, worker: &WorkerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_demo(demo, worker, &mut errors);
    into_result(errors)
}

fn into_result(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_fabric(config: &SessionConfig, errors: &mut Vec<ValidationError>) {
    if config.context.features.is_empty() {
        errors.push(ValidationError::new("context.features", "at least one feature is required"));
    }
    for name in &config.context.features {
        if Features::from_name(name).is_none() {
            errors.push(ValidationError::new(
                "context.features",
                format!("unknown feature '{}'", name),
            ));
        }
    }

    if config.worker.progress_batch == 0 {
        errors.push(ValidationError::new("worker.progress_batch", "must be greater than 0"));
    }
    if config.worker.rx_chunk_size == 0 {
        errors.push(ValidationError::new("worker.rx_chunk_size", "must be greater than 0"));
    }
    if config.worker.max_message_size == 0 {
        errors.push(ValidationError::new("worker.max_message_size", "must be greater than 0"));
    } else if config.worker.max_message_size > u32::MAX as usize {
        errors.push(ValidationError::new(
            "worker.max_message_size",
            format!("must not exceed {}", u32::MAX),
        ));
    }
    if config.worker.max_unexpected == 0 {
        errors.push(ValidationError::new("worker.max_unexpected", "must be greater than 0"));
    }

    if config.endpoint.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("endpoint.connect_timeout_ms", "must be greater than 0"));
    }
}

fn check_observability(config: &ObservabilityConfig, errors: &mut Vec<ValidationError>) {
    if !LOG_LEVELS.contains(&config.log_level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.log_level),
        ));
    }
    if config.metrics_enabled && config.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.metrics_address),
        ));
    }
}

fn check_demo(demo: &DemoConfig, worker: &WorkerConfig, errors: &mut Vec<ValidationError>) {
    if demo.count == 0 {
        errors.push(ValidationError::new("demo.count", "must be greater than 0"));
    } else if demo.count.saturating_mul(4) > worker.max_message_size {
        errors.push(ValidationError::new(
            "demo.count",
            "payload exceeds worker.max_message_size",
        ));
    }
}
