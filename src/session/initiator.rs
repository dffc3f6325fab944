//! Client role: dial one server and send to it.

use std::net::SocketAddr;

use crate::config::SessionConfig;
use crate::fabric::{
    CloseMode, EndpointId, EndpointParams, ErrHandlingMode, ErrorHandler, OpHandle,
    RequestParams, Status, Tag,
};
use crate::observability::metrics;
use crate::session::address::{prepare_socket_address, AddressRole};
use crate::session::error::TransportError;
use crate::session::transport::{peer_error_handler, TransportSession};

/// Client side of a session. Owns at most one outbound endpoint.
pub struct ConnectionInitiator {
    endpoint: Option<EndpointId>,
    peer_handler: Option<ErrorHandler>,
    session: TransportSession,
}

impl ConnectionInitiator {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(&SessionConfig::default())
    }

    pub fn with_config(config: &SessionConfig) -> Result<Self, TransportError> {
        Ok(Self {
            endpoint: None,
            peer_handler: None,
            session: TransportSession::with_config(config)?,
        })
    }

    /// Call `handler` on peer failures, after the failure has been logged.
    ///
    /// Applies to endpoints created after this call.
    pub fn on_peer_error(&mut self, handler: ErrorHandler) {
        self.peer_handler = Some(handler);
    }

    /// Dial `address:port` and create the outbound endpoint.
    pub fn connect(&mut self, address: &str, port: u16) -> Result<SocketAddr, TransportError> {
        let target = format!("{}:{}", address, port);
        if let Some(existing) = self.endpoint {
            tracing::warn!(endpoint = %existing, target = %target, "Client is already connected");
            return Err(TransportError::EndpointCreation {
                target,
                status: Status::AlreadyExists,
            });
        }

        let addr = prepare_socket_address(address, port, AddressRole::Client).map_err(|status| {
            tracing::error!(target = %target, status = %status, "Failed to resolve server address");
            TransportError::EndpointCreation {
                target: target.clone(),
                status,
            }
        })?;

        let params = EndpointParams::connect(addr)
            .client_server()
            .err_mode(ErrHandlingMode::Peer)
            .err_handler(peer_error_handler("client", self.peer_handler.clone()));
        let endpoint = self.session.worker_mut().ep_create(params).map_err(|status| {
            tracing::error!(address = %addr, status = %status, "Failed to create endpoint");
            TransportError::EndpointCreation { target, status }
        })?;

        self.endpoint = Some(endpoint);
        metrics::record_endpoint_created("client");
        tracing::info!(endpoint = %endpoint, server = %addr, "Connected to server");
        Ok(addr)
    }

    /// Send the first `length` bytes of `buffer` with tag 0.
    ///
    /// The buffer comes back in the completion once the handle resolves.
    pub fn send_message(&mut self, buffer: Vec<u8>, length: usize) -> OpHandle {
        let handle = match self.endpoint {
            Some(endpoint) => self.session.worker_mut().tag_send_nb(
                endpoint,
                buffer,
                length,
                Tag(0),
                &RequestParams::default(),
            ),
            None => OpHandle::Failed(Status::NotConnected),
        };
        metrics::record_request("send", &handle);
        handle
    }

    pub fn is_connected(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn endpoint(&self) -> Option<EndpointId> {
        self.endpoint
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut TransportSession {
        &mut self.session
    }
}

impl std::fmt::Debug for ConnectionInitiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInitiator")
            .field("endpoint", &self.endpoint)
            .field("peer_handler", &self.peer_handler.is_some())
            .field("session", &self.session)
            .finish()
    }
}

impl Drop for ConnectionInitiator {
    fn drop(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            let handle = self.session.worker_mut().ep_close_nb(endpoint, CloseMode::Flush);
            if let OpHandle::Failed(status) = handle {
                tracing::debug!(endpoint = %endpoint, status = %status, "Endpoint close failed");
            }
        }
    }
}
