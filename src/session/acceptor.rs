//! Server role: listen, admit exactly one client, receive from it.
//!
//! # Admission States
//! ```text
//! Idle
//!     → listen()           → Listening (awaiting the first request)
//!     → admission handler  → RequestStored (slot taken, never re-armed)
//!     → bind_endpoint()    → EndpointBound
//!
//! Every request arriving after the slot is taken is refused on the spot.
//! ```
//!
//! # Design Decisions
//! - The slot is shared with the listener's handler through an `Arc`, and
//!   claimed with an atomic test-and-set
//! - A refused request is handed back to the worker, which rejects it

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::SessionConfig;
use crate::fabric::{
    Admission, CloseMode, ConnRequest, EndpointId, EndpointParams, ErrHandlingMode, ErrorHandler,
    ListenerId, ListenerParams, OpHandle, RequestParams, Status, Tag, TagMask,
};
use crate::observability::metrics::{self, AdmissionOutcome};
use crate::session::address::{prepare_socket_address, AddressRole};
use crate::session::error::TransportError;
use crate::session::transport::{peer_error_handler, TransportSession};

/// Where an acceptor is in admitting its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorState {
    Idle,
    Listening,
    RequestStored,
    EndpointBound,
}

/// Single-request slot shared by the acceptor and its admission handler.
#[derive(Debug, Default)]
pub struct AdmissionSlot {
    claimed: AtomicBool,
    request: Mutex<Option<ConnRequest>>,
}

impl AdmissionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `request` if the slot was never claimed; otherwise hand it back.
    pub fn store(&self, request: ConnRequest) -> Result<(), ConnRequest> {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(request);
        }
        *self.lock() = Some(request);
        Ok(())
    }

    /// Whether a request was ever stored.
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Take the stored request out. The slot stays claimed.
    pub fn take(&self) -> Option<ConnRequest> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ConnRequest>> {
        self.request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Admission handler body: keep the first request, refuse every other one.
pub fn admit(request: ConnRequest, slot: &AdmissionSlot) -> Admission {
    match request.query() {
        Ok(attr) => {
            tracing::info!(request = %request, client = %attr.client_addr, "Connection request received")
        }
        Err(Status::Unsupported) => {}
        Err(status) => {
            tracing::warn!(request = %request, status = %status, "Failed to query connection request")
        }
    }

    match slot.store(request) {
        Ok(()) => {
            metrics::record_admission(AdmissionOutcome::Stored);
            Admission::Held
        }
        Err(request) => {
            tracing::info!(request = %request, "Server only accepts one client at a time, rejecting");
            metrics::record_admission(AdmissionOutcome::Refused);
            Admission::Refused(request)
        }
    }
}

/// Server side of a session. Owns at most one listener and one inbound endpoint.
pub struct ConnectionAcceptor {
    slot: Arc<AdmissionSlot>,
    listener: Option<ListenerId>,
    endpoint: Option<EndpointId>,
    peer_handler: Option<ErrorHandler>,
    session: TransportSession,
}

impl ConnectionAcceptor {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(&SessionConfig::default())
    }

    pub fn with_config(config: &SessionConfig) -> Result<Self, TransportError> {
        Ok(Self {
            slot: Arc::new(AdmissionSlot::new()),
            listener: None,
            endpoint: None,
            peer_handler: None,
            session: TransportSession::with_config(config)?,
        })
    }

    /// Call `handler` on peer failures, after the failure has been logged.
    pub fn on_peer_error(&mut self, handler: ErrorHandler) {
        self.peer_handler = Some(handler);
    }

    /// Listen, wait for the first client, and bind an endpoint to it.
    ///
    /// Blocks until a client connects. Returns the bound listen address.
    pub fn start_server(&mut self, address: &str, port: u16) -> Result<SocketAddr, TransportError> {
        let local_addr = self.listen(address, port)?;
        self.wait_for_client()?;
        self.bind_endpoint()?;
        Ok(local_addr)
    }

    /// Bind the listener and register the admission handler.
    pub fn listen(&mut self, address: &str, port: u16) -> Result<SocketAddr, TransportError> {
        let target = format!("{}:{}", address, port);
        if self.listener.is_some() {
            return Err(TransportError::Listener {
                address: target,
                status: Status::AlreadyExists,
            });
        }

        let addr = prepare_socket_address(address, port, AddressRole::Server).map_err(|status| {
            tracing::error!(address = %target, status = %status, "Failed to resolve listen address");
            TransportError::Listener {
                address: target.clone(),
                status,
            }
        })?;

        let slot = Arc::clone(&self.slot);
        let params = ListenerParams::new(addr, Box::new(move |request| admit(request, &slot)));
        let listener = self
            .session
            .worker_mut()
            .listener_create(params)
            .map_err(|status| TransportError::Listener {
                address: addr.to_string(),
                status,
            })?;

        let local_addr = self
            .session
            .worker_mut()
            .listener_local_addr(listener)
            .map_err(|status| TransportError::Listener {
                address: addr.to_string(),
                status,
            })?;
        self.listener = Some(listener);
        tracing::info!(listener = %listener, address = %local_addr, "Waiting for connection");
        Ok(local_addr)
    }

    /// Spin on progress until a connection request is stored. No timeout.
    pub fn wait_for_client(&mut self) -> Result<(), TransportError> {
        if self.listener.is_none() && !self.is_client_connected() {
            return Err(TransportError::Listener {
                address: "<none>".to_string(),
                status: Status::NotConnected,
            });
        }
        while !self.is_client_connected() {
            self.session.progress();
        }
        Ok(())
    }

    /// Same as [`wait_for_client`](Self::wait_for_client), yielding to the
    /// tokio scheduler between progress rounds.
    pub async fn wait_for_client_async(&mut self) -> Result<(), TransportError> {
        if self.listener.is_none() && !self.is_client_connected() {
            return Err(TransportError::Listener {
                address: "<none>".to_string(),
                status: Status::NotConnected,
            });
        }
        while !self.is_client_connected() {
            while self.session.progress() > 0 {}
            if self.is_client_connected() {
                break;
            }
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    /// Create the inbound endpoint from the stored connection request.
    pub fn bind_endpoint(&mut self) -> Result<EndpointId, TransportError> {
        if let Some(existing) = self.endpoint {
            return Err(TransportError::EndpointCreation {
                target: existing.to_string(),
                status: Status::AlreadyExists,
            });
        }
        let Some(request) = self.slot.take() else {
            return Err(TransportError::EndpointCreation {
                target: "connection request".to_string(),
                status: Status::NoElem,
            });
        };

        let target = match request.query() {
            Ok(attr) => attr.client_addr.to_string(),
            Err(_) => request.to_string(),
        };
        let params = EndpointParams::from_request(request)
            .err_mode(ErrHandlingMode::Peer)
            .err_handler(peer_error_handler("server", self.peer_handler.clone()));
        let endpoint = self.session.worker_mut().ep_create(params).map_err(|status| {
            tracing::error!(client = %target, status = %status, "Failed to create endpoint");
            TransportError::EndpointCreation { target: target.clone(), status }
        })?;

        self.endpoint = Some(endpoint);
        metrics::record_endpoint_created("server");
        tracing::info!(endpoint = %endpoint, client = %target, "Client connected");
        Ok(endpoint)
    }

    /// Try to claim the single request slot.
    pub fn store_connection_request(&self, request: ConnRequest) -> Result<(), ConnRequest> {
        self.slot.store(request)
    }

    /// Refuse `request`; the peer sees the connection rejected. Failures are logged.
    pub fn reject_connection(&mut self, request: ConnRequest) {
        let Some(listener) = self.listener else {
            tracing::warn!(request = %request, "No listener to reject the connection request on");
            return;
        };
        if let Err(status) = self.session.worker_mut().listener_reject(listener, request) {
            tracing::error!(listener = %listener, status = %status, "Server failed to reject a connection request");
        }
    }

    /// True once a connection request has been stored.
    pub fn is_client_connected(&self) -> bool {
        self.slot.is_claimed()
    }

    /// Post a receive of `length` bytes into `buffer` for tag 0.
    pub fn receive_message(&mut self, buffer: Vec<u8>, length: usize) -> OpHandle {
        let handle = self.session.worker_mut().tag_recv_nb(
            buffer,
            length,
            Tag(0),
            TagMask::FULL,
            &RequestParams::default(),
        );
        metrics::record_request("recv", &handle);
        handle
    }

    pub fn state(&self) -> AcceptorState {
        if self.endpoint.is_some() {
            AcceptorState::EndpointBound
        } else if self.slot.is_claimed() {
            AcceptorState::RequestStored
        } else if self.listener.is_some() {
            AcceptorState::Listening
        } else {
            AcceptorState::Idle
        }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        let listener = self.listener?;
        self.session.worker().listener_local_addr(listener).ok()
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

impl std::fmt::Debug for ConnectionAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionAcceptor")
            .field("state", &self.state())
            .field("listener", &self.listener)
            .field("endpoint", &self.endpoint)
            .field("session", &self.session)
            .finish()
    }
}

impl Drop for ConnectionAcceptor {
    fn drop(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            let handle = self.session.worker_mut().ep_close_nb(endpoint, CloseMode::Flush);
            if let OpHandle::Failed(status) = handle {
                tracing::debug!(endpoint = %endpoint, status = %status, "Endpoint close failed");
            }
        }
        if let Some(request) = self.slot.take() {
            self.reject_connection(request);
        }
        if let Some(listener) = self.listener.take() {
            self.session.worker_mut().listener_destroy(listener);
        }
    }
}
