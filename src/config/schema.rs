//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a session.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for a transport session.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SessionConfig {
    /// Context settings (enabled features).
    pub context: ContextConfig,

    /// Progress engine settings.
    pub worker: WorkerConfig,

    /// Endpoint creation settings.
    pub endpoint: EndpointConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Defaults for the demo driver.
    pub demo: DemoConfig,
}

/// Context configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Features the fabric enables (e.g. ["tag"]).
    pub features: Vec<String>,

    /// Whether workers created from this context may be shared across threads.
    pub mt_workers_shared: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            features: vec!["tag".to_string()],
            mt_workers_shared: true,
        }
    }
}

/// Worker (progress engine) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum reads per endpoint in a single progress step.
    pub progress_batch: usize,

    /// Size of a single socket read in bytes.
    pub rx_chunk_size: usize,

    /// Largest message the worker accepts in bytes.
    pub max_message_size: usize,

    /// Unmatched messages held before endpoint reads pause.
    pub max_unexpected: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            progress_batch: 64,
            rx_chunk_size: 64 * 1024,
            max_message_size: 16 * 1024 * 1024,
            max_unexpected: 1024,
        }
    }
}

/// Endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Disable Nagle's algorithm on endpoint sockets.
    pub tcp_nodelay: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            tcp_nodelay: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9464".to_string(),
        }
    }
}

/// Demo driver defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Address the server binds and the client dials.
    pub address: String,

    /// Port the server binds and the client dials.
    pub port: u16,

    /// Number of 32-bit integers in the payload.
    pub count: usize,

    /// First integer the client sends.
    pub start: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 12353,
            count: 10,
            start: 10,
        }
    }
}
