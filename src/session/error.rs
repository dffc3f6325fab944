//! Session error taxonomy.

use thiserror::Error;

use crate::fabric::Status;

/// Setup step of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Context,
    Worker,
}

impl std::fmt::Display for SetupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetupStage::Context => write!(f, "context"),
            SetupStage::Worker => write!(f, "worker"),
        }
    }
}

/// Errors raised by session setup and by waiting on operations.
///
/// Refused duplicate connections and peer failures are not errors at this
/// layer; they are logged and counted.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Context or worker setup failed. The session was not created.
    #[error("Failed to create {stage}: {status}")]
    Configuration { stage: SetupStage, status: Status },

    /// Address resolution or endpoint construction failed.
    #[error("Failed to create endpoint for {target}: {status}")]
    EndpointCreation { target: String, status: Status },

    /// Bind or listen setup failed.
    #[error("Failed to listen on {address}: {status}")]
    Listener { address: String, status: Status },

    /// An issued send or receive resolved to an error.
    #[error("Operation failed: {0}")]
    Operation(Status),
}

impl TransportError {
    /// The fabric status behind the error.
    pub fn status(&self) -> Status {
        match self {
            TransportError::Configuration { status, .. }
            | TransportError::EndpointCreation { status, .. }
            | TransportError::Listener { status, .. } => *status,
            TransportError::Operation(status) => *status,
        }
    }
}
