//! Transport session: one context and one worker, plus the waits built on
//! the worker's progress call.
//!
//! # Responsibilities
//! - Create the context then the worker, failing fast on either step
//! - Drive progress one step at a time
//! - Wait for an operation handle to resolve (spin or cooperative yield)
//!
//! # Design Decisions
//! - Neither wait has a timeout or cancellation; a silent peer blocks forever
//! - Field order tears the worker down before the context

use std::sync::Arc;

use crate::config::SessionConfig;
use crate::fabric::{
    Completion, Context, ContextParams, EndpointId, ErrorHandler, OpHandle, RequestId, Status,
    Worker,
};
use crate::observability::metrics;
use crate::session::error::{SetupStage, TransportError};

/// A worker/context pair.
pub struct TransportSession {
    worker: Worker,
    context: Context,
}

impl TransportSession {
    /// Session with the default configuration.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(&SessionConfig::default())
    }

    pub fn with_config(config: &SessionConfig) -> Result<Self, TransportError> {
        let context = Context::init(&ContextParams::default(), config).map_err(|status| {
            tracing::error!(status = %status, "Failed to initialize context");
            TransportError::Configuration {
                stage: SetupStage::Context,
                status,
            }
        })?;

        let worker = Worker::create(&context, &context.worker_defaults()).map_err(|status| {
            tracing::error!(status = %status, "Failed to create worker");
            TransportError::Configuration {
                stage: SetupStage::Worker,
                status,
            }
        })?;

        tracing::debug!("Transport session created");
        Ok(Self { worker, context })
    }

    /// Advance the worker by one step. Safe to call with nothing to do.
    pub fn progress(&mut self) -> usize {
        self.worker.progress()
    }

    /// Spin on `progress()` until `handle` resolves, then release it.
    ///
    /// Blocks the calling thread for as long as the operation takes.
    pub fn wait_for_completion(&mut self, handle: OpHandle) -> Result<Completion, TransportError> {
        match handle {
            OpHandle::Immediate(completion) => Ok(completion),
            OpHandle::Failed(status) => Err(TransportError::Operation(status)),
            OpHandle::Pending(request) => {
                while self.poll_request(request).is_in_progress() {
                    std::hint::spin_loop();
                }
                self.release(request)
            }
        }
    }

    /// Same as [`wait_for_completion`](Self::wait_for_completion), yielding to
    /// the tokio scheduler between progress rounds.
    pub async fn wait_for_completion_async(
        &mut self,
        handle: OpHandle,
    ) -> Result<Completion, TransportError> {
        match handle {
            OpHandle::Immediate(completion) => Ok(completion),
            OpHandle::Failed(status) => Err(TransportError::Operation(status)),
            OpHandle::Pending(request) => {
                while self.poll_request(request).is_in_progress() {
                    tokio::task::yield_now().await;
                }
                self.release(request)
            }
        }
    }

    /// Drain progress, then report the request's status.
    fn poll_request(&mut self, request: RequestId) -> Status {
        while self.worker.progress() > 0 {}
        self.worker.request_check_status(request)
    }

    fn release(&mut self, request: RequestId) -> Result<Completion, TransportError> {
        self.worker.request_release(request).map_err(|status| {
            tracing::debug!(request = %request, status = %status, "Operation failed");
            TransportError::Operation(status)
        })
    }

    /// Status of a pending request without progressing; `NoElem` once released.
    pub fn request_status(&self, request: RequestId) -> Status {
        self.worker.request_check_status(request)
    }

    /// Requests issued but not yet released.
    pub fn outstanding_requests(&self) -> usize {
        self.worker.outstanding_requests()
    }

    /// Listeners, endpoints and pending connection requests alive in the worker.
    pub fn resource_count(&self) -> usize {
        self.worker.resource_count()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub(crate) fn worker(&self) -> &Worker {
        &self.worker
    }

    pub(crate) fn worker_mut(&mut self) -> &mut Worker {
        &mut self.worker
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("worker", &self.worker)
            .field("features", &self.context.features())
            .finish()
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        tracing::debug!("Transport session destroyed");
    }
}

/// Error handler installed on every session endpoint.
///
/// Logs and counts the failure, then hands it to `next` if the caller
/// registered one. Never retries.
pub(crate) fn peer_error_handler(role: &'static str, next: Option<ErrorHandler>) -> ErrorHandler {
    Arc::new(move |endpoint: EndpointId, status: Status| {
        tracing::error!(role, endpoint = %endpoint, status = %status, "Peer error");
        metrics::record_peer_error(status);
        if let Some(next) = &next {
            next(endpoint, status);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::Tag;

    #[test]
    fn test_idle_progress() {
        let mut session = TransportSession::new().unwrap();
        for _ in 0..50 {
            assert_eq!(session.progress(), 0);
        }
        assert_eq!(session.outstanding_requests(), 0);
    }

    #[test]
    fn test_invalid_config_fails_at_context() {
        let mut config = SessionConfig::default();
        config.worker.max_message_size = 0;
        let err = TransportSession::with_config(&config).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Configuration {
                stage: SetupStage::Context,
                status: Status::InvalidParam
            }
        ));
    }

    #[test]
    fn test_wait_on_resolved_handles() {
        let mut session = TransportSession::new().unwrap();
        let completion = Completion::new(vec![1, 2], 2, Tag(0));
        let got = session
            .wait_for_completion(OpHandle::Immediate(completion.clone()))
            .unwrap();
        assert_eq!(got, completion);

        let err = session
            .wait_for_completion(OpHandle::Failed(Status::Rejected))
            .unwrap_err();
        assert_eq!(err.status(), Status::Rejected);
    }

    #[test]
    fn test_wait_on_unknown_request_fails() {
        let mut session = TransportSession::new().unwrap();
        let err = session
            .wait_for_completion(OpHandle::Pending(RequestId::from_raw(99)))
            .unwrap_err();
        assert_eq!(err.status(), Status::NoElem);
    }
}
