//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define session and fabric counters
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//!
//! # Metrics
//! - `tagwire_admissions_total` (counter): inbound connection requests by outcome
//! - `tagwire_requests_total` (counter): issued sends/receives by kind and
//!   outcome at issue time (immediate, pending, or the failure status)
//! - `tagwire_peer_errors_total` (counter): peer failures by status
//! - `tagwire_endpoints_created_total` (counter): endpoints by role
//!
//! # Design Decisions
//! - Counters only; the session layer has no latency-sensitive hot path
//! - Labels are `&'static str`

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::fabric::{OpHandle, Status};

/// Outcome label for admissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Stored,
    Refused,
}

impl AdmissionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionOutcome::Stored => "stored",
            AdmissionOutcome::Refused => "refused",
        }
    }
}

pub fn record_admission(outcome: AdmissionOutcome) {
    metrics::counter!("tagwire_admissions_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record an issued send or receive. `kind` is `"send"` or `"recv"`.
pub fn record_request(kind: &'static str, handle: &OpHandle) {
    let outcome = match handle {
        OpHandle::Immediate(_) => "immediate",
        OpHandle::Pending(_) => "pending",
        OpHandle::Failed(status) => status.name(),
    };
    metrics::counter!("tagwire_requests_total", "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_peer_error(status: Status) {
    metrics::counter!("tagwire_peer_errors_total", "status" => status.name()).increment(1);
}

/// Record an endpoint creation. `role` is `"client"` or `"server"`.
pub fn record_endpoint_created(role: &'static str) {
    metrics::counter!("tagwire_endpoints_created_total", "role" => role).increment(1);
}

/// Install the Prometheus recorder with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}
