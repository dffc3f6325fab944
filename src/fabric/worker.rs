//! The progress engine.
//!
//! # Responsibilities
//! - Own listeners, pending connection requests, endpoints and requests
//! - Issue non-blocking tagged sends and receives
//! - Advance everything one step per `progress()` call
//!
//! # Progress Step
//! ```text
//! progress()
//!     → accept pending sockets, hand each ConnRequest to its listener's handler
//!     → reject requests the handler refused
//!     → per endpoint: flush send queue, read frames, match frames to receives
//!       (dialed endpoints flush nothing until the peer's Accept frame arrives)
//!     → fail endpoints whose peer went away, then run their error handlers
//!     → finish closing endpoints whose queue drained
//! ```
//!
//! # Design Decisions
//! - Nothing runs in the background; all work happens inside `progress()`
//! - Error handlers only run inside `progress()`, after the worker's tables
//!   are consistent again; failures seen by `tag_send_nb` are reported on the
//!   next step
//! - While `max_unexpected` messages wait unmatched, accepted endpoints are
//!   not read, so a flooding peer is held back by TCP flow control
//! - An idle worker does no work and reports zero events

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::fabric::context::{Context, ContextShared, Features};
use crate::fabric::endpoint::{
    CloseMode, CompletedWrite, Endpoint, EndpointId, EndpointParams, EndpointPhase, EndpointTarget,
    ErrHandlingMode, ErrorHandler, PendingWrite,
};
use crate::fabric::listener::{
    Admission, ConnRequest, ConnRequestId, ListenerId, ListenerParams, ListenerState, PendingConn,
};
use crate::fabric::request::{fill_receive, Completion, OpHandle, RequestArena, RequestId, RequestParams};
use crate::fabric::status::Status;
use crate::fabric::tag::{Tag, TagMask};

/// Tunables of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerParams {
    /// Maximum socket reads per endpoint in one progress step.
    pub progress_batch: usize,
    /// Size of one socket read.
    pub rx_chunk_size: usize,
    /// Largest accepted message.
    pub max_message_size: usize,
    /// Unmatched messages held before endpoint reads pause.
    pub max_unexpected: usize,
    /// Timeout for dialing a remote listener.
    pub connect_timeout: Duration,
    pub tcp_nodelay: bool,
}

impl Default for WorkerParams {
    fn default() -> Self {
        Self {
            progress_batch: 64,
            rx_chunk_size: 64 * 1024,
            max_message_size: 16 * 1024 * 1024,
            max_unexpected: 1024,
            connect_timeout: Duration::from_secs(5),
            tcp_nodelay: true,
        }
    }
}

/// A message that arrived before any matching receive was posted.
#[derive(Debug)]
struct UnexpectedMessage {
    tag: Tag,
    payload: Vec<u8>,
}

/// Progress engine owning every fabric resource of one session.
pub struct Worker {
    context: Arc<ContextShared>,
    params: WorkerParams,
    next_id: u64,
    listeners: BTreeMap<ListenerId, ListenerState>,
    pending_conns: HashMap<ConnRequestId, PendingConn>,
    endpoints: BTreeMap<EndpointId, Endpoint>,
    requests: RequestArena,
    unexpected: VecDeque<UnexpectedMessage>,
    deferred_errors: Vec<(ErrorHandler, EndpointId, Status)>,
}

/// Complete the requests behind finished writes; returns the number of writes.
fn complete_writes(requests: &mut RequestArena, items: Vec<CompletedWrite>) -> usize {
    let count = items.len();
    for done in items {
        if let Some(request) = done.request {
            requests.complete(request, Completion::new(done.payload, done.length, done.tag));
        }
    }
    count
}

impl Worker {
    /// Create a worker on `context`.
    pub fn create(context: &Context, params: &WorkerParams) -> Result<Worker, Status> {
        if params.progress_batch == 0
            || params.rx_chunk_size == 0
            || params.max_message_size == 0
            || params.max_message_size > u32::MAX as usize
            || params.max_unexpected == 0
        {
            tracing::error!(params = ?params, "Invalid worker parameters");
            return Err(Status::InvalidParam);
        }

        tracing::debug!(
            progress_batch = params.progress_batch,
            max_message_size = params.max_message_size,
            "Worker created"
        );

        Ok(Worker {
            context: context.shared(),
            params: params.clone(),
            next_id: 0,
            listeners: BTreeMap::new(),
            pending_conns: HashMap::new(),
            endpoints: BTreeMap::new(),
            requests: RequestArena::new(),
            unexpected: VecDeque::new(),
            deferred_errors: Vec::new(),
        })
    }

    fn next_raw_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn params(&self) -> &WorkerParams {
        &self.params
    }

    // --- Progress ---

    /// Advance all work by one step; returns the number of events handled.
    pub fn progress(&mut self) -> usize {
        let mut events = self.progress_listeners();

        let mut failed: Vec<(EndpointId, Status)> = Vec::new();
        let mut drained: Vec<EndpointId> = Vec::new();
        let mut arrived: Vec<(Tag, Vec<u8>)> = Vec::new();

        let unexpected_full = self.unexpected.len() >= self.params.max_unexpected;

        for (id, ep) in self.endpoints.iter_mut() {
            if matches!(ep.phase, EndpointPhase::Failed(_)) {
                continue;
            }

            let flushed = ep.flush();
            events += complete_writes(&mut self.requests, flushed.items);
            if let Some(status) = flushed.error {
                failed.push((*id, status));
                continue;
            }

            let was_accepted = ep.is_accepted();
            if was_accepted && ep.phase == EndpointPhase::Closing {
                if !ep.has_queued() {
                    drained.push(*id);
                }
                continue;
            }
            if was_accepted && unexpected_full {
                continue;
            }

            let read = ep.poll_read(self.params.progress_batch);
            for frame in read.items {
                events += 1;
                arrived.push((frame.tag, frame.payload));
            }
            if let Some(status) = read.error {
                failed.push((*id, status));
                continue;
            }

            if !was_accepted && ep.is_accepted() {
                events += 1;
                let flushed = ep.flush();
                events += complete_writes(&mut self.requests, flushed.items);
                if let Some(status) = flushed.error {
                    failed.push((*id, status));
                }
            }
        }

        for (tag, payload) in arrived {
            if let Some(payload) = self.requests.deliver(tag, payload) {
                tracing::trace!(tag = %tag, len = payload.len(), "Queued unexpected message");
                self.unexpected.push_back(UnexpectedMessage { tag, payload });
            }
        }

        for id in drained {
            if let Some(ep) = self.endpoints.remove(&id) {
                ep.shutdown();
                tracing::debug!(endpoint = %id, "Endpoint closed after flush");
                events += 1;
            }
        }

        let mut handlers = std::mem::take(&mut self.deferred_errors);
        events += handlers.len();
        for (id, status) in failed {
            events += 1;
            if let Some(handler) = self.fail_endpoint(id, status) {
                handlers.push((handler, id, status));
            }
        }
        for (handler, id, status) in handlers {
            handler(id, status);
        }

        events
    }

    fn progress_listeners(&mut self) -> usize {
        let mut events = 0;
        let mut refused: Vec<ConnRequest> = Vec::new();
        let ids: Vec<ListenerId> = self.listeners.keys().copied().collect();

        for listener_id in ids {
            loop {
                let accepted = match self.listeners.get(&listener_id) {
                    Some(listener) => listener.try_accept(),
                    None => break,
                };
                let (stream, client_addr) = match accepted {
                    Ok(Some(conn)) => conn,
                    Ok(None) | Err(_) => break,
                };
                events += 1;

                let request_id = ConnRequestId::from_raw(self.next_raw_id());
                self.pending_conns.insert(
                    request_id,
                    PendingConn {
                        stream,
                        listener: listener_id,
                    },
                );
                let request = ConnRequest {
                    id: request_id,
                    listener: listener_id,
                    client_addr,
                };

                if let Some(listener) = self.listeners.get_mut(&listener_id) {
                    if let Admission::Refused(request) = (listener.handler)(request) {
                        refused.push(request);
                    }
                }
            }
        }

        for request in refused {
            let listener = request.listener;
            if let Err(status) = self.listener_reject(listener, request) {
                tracing::warn!(listener = %listener, status = %status, "Server failed to reject a connection request");
            }
        }
        events
    }

    /// Mark an endpoint failed, fail its queued sends, and return the error
    /// handler to run (peer error mode only).
    fn fail_endpoint(&mut self, id: EndpointId, status: Status) -> Option<ErrorHandler> {
        let ep = self.endpoints.get_mut(&id)?;

        for request in ep.drain_queue() {
            self.requests.fail(request, status);
        }
        self.requests.fail_sends_on(id, status);

        if ep.phase == EndpointPhase::Closing {
            ep.shutdown();
            self.endpoints.remove(&id);
            tracing::debug!(endpoint = %id, status = %status, "Closing endpoint dropped after peer failure");
            return None;
        }

        ep.phase = EndpointPhase::Failed(status);
        tracing::debug!(endpoint = %id, peer = %ep.peer, status = %status, "Endpoint failed");
        match ep.err_mode {
            ErrHandlingMode::Peer => ep.err_handler.clone(),
            ErrHandlingMode::None => None,
        }
    }

    // --- Listeners ---

    /// Bind a listener; its handler runs during `progress()`.
    pub fn listener_create(&mut self, params: ListenerParams) -> Result<ListenerId, Status> {
        let state = ListenerState::bind(params)?;
        let id = ListenerId::from_raw(self.next_raw_id());
        self.listeners.insert(id, state);
        Ok(id)
    }

    pub fn listener_local_addr(&self, listener: ListenerId) -> Result<SocketAddr, Status> {
        self.listeners
            .get(&listener)
            .map(|l| l.local_addr)
            .ok_or(Status::NoElem)
    }

    /// Refuse `request`; the peer observes a rejected connection.
    ///
    /// A request passed with the wrong listener is still refused, since it is
    /// consumed either way, and the call reports `InvalidParam`.
    pub fn listener_reject(&mut self, listener: ListenerId, request: ConnRequest) -> Result<(), Status> {
        let pending = self.pending_conns.remove(&request.id);
        if request.listener != listener || !self.listeners.contains_key(&listener) {
            tracing::warn!(request = %request, listener = %listener, "Rejecting request through the wrong listener");
            if let Some(pending) = pending {
                if let Err(status) = pending.refuse() {
                    tracing::warn!(request = %request, status = %status, "Failed to refuse connection request");
                }
            }
            return Err(Status::InvalidParam);
        }
        let pending = pending.ok_or(Status::NoElem)?;
        tracing::debug!(request = %request, "Connection request rejected");
        pending.refuse()
    }

    /// Stop listening. Requests not yet resolved are dropped with it.
    pub fn listener_destroy(&mut self, listener: ListenerId) {
        if let Some(state) = self.listeners.remove(&listener) {
            self.pending_conns.retain(|_, pending| pending.listener != listener);
            tracing::debug!(listener = %listener, address = %state.local_addr, "Listener destroyed");
        }
    }

    // --- Endpoints ---

    /// Create an endpoint by dialing an address or accepting a request.
    ///
    /// Accepting writes the Accept frame right away. A dialed endpoint takes
    /// sends at once but holds them until that frame arrives.
    pub fn ep_create(&mut self, params: EndpointParams) -> Result<EndpointId, Status> {
        let dialed = matches!(params.target, EndpointTarget::SockAddr(_));
        let (stream, peer) = match params.target {
            EndpointTarget::SockAddr(addr) => {
                if !params.client_server {
                    return Err(Status::InvalidParam);
                }
                let stream = TcpStream::connect_timeout(&addr, self.params.connect_timeout)
                    .map_err(|e| {
                        tracing::debug!(address = %addr, error = %e, "Connect failed");
                        Status::from(&e)
                    })?;
                (stream, addr)
            }
            EndpointTarget::ConnRequest(request) => {
                let pending = self.pending_conns.remove(&request.id).ok_or(Status::NoElem)?;
                let peer = match request.client_addr {
                    Some(addr) => addr,
                    None => pending.stream.peer_addr().map_err(|e| Status::from(&e))?,
                };
                (pending.stream, peer)
            }
        };

        stream.set_nonblocking(true).map_err(|e| Status::from(&e))?;
        stream
            .set_nodelay(self.params.tcp_nodelay)
            .map_err(|e| Status::from(&e))?;

        let id = EndpointId::from_raw(self.next_raw_id());
        let mut ep = Endpoint::new(id, stream, peer, params.err_mode, params.err_handler, &self.params);
        if dialed {
            ep = ep.awaiting_accept();
        } else {
            ep.queue_accept();
            if let Some(status) = ep.flush().error {
                tracing::debug!(endpoint = %id, peer = %peer, status = %status, "Peer gone before accept");
                ep.shutdown();
                return Err(status);
            }
        }
        self.endpoints.insert(id, ep);
        tracing::debug!(endpoint = %id, peer = %peer, dialed, "Endpoint created");
        Ok(id)
    }

    /// Start closing an endpoint without waiting for it.
    ///
    /// With `Flush` and queued sends, the endpoint keeps writing during
    /// `progress()` and is removed once its queue drains. The returned handle
    /// resolves immediately in both modes.
    pub fn ep_close_nb(&mut self, endpoint: EndpointId, mode: CloseMode) -> OpHandle {
        let Some(ep) = self.endpoints.get_mut(&endpoint) else {
            return OpHandle::Failed(Status::NoElem);
        };

        let keep_flushing = mode == CloseMode::Flush
            && ep.phase == EndpointPhase::Connected
            && ep.has_queued();
        if keep_flushing {
            ep.phase = EndpointPhase::Closing;
            tracing::debug!(endpoint = %endpoint, "Endpoint closing, flushing queued sends");
            return OpHandle::Immediate(Completion::new(Vec::new(), 0, Tag(0)));
        }

        let waiting = ep.drain_queue();
        ep.shutdown();
        self.endpoints.remove(&endpoint);
        for request in waiting {
            self.requests.fail(request, Status::Canceled);
        }
        self.requests.fail_sends_on(endpoint, Status::Canceled);
        tracing::debug!(endpoint = %endpoint, mode = ?mode, "Endpoint closed");
        OpHandle::Immediate(Completion::new(Vec::new(), 0, Tag(0)))
    }

    /// Peer address of an endpoint.
    pub fn ep_peer_addr(&self, endpoint: EndpointId) -> Result<SocketAddr, Status> {
        self.endpoints
            .get(&endpoint)
            .map(|ep| ep.peer)
            .ok_or(Status::NoElem)
    }

    /// `Ok` while connected, the failure status once the peer failed.
    pub fn ep_status(&self, endpoint: EndpointId) -> Status {
        match self.endpoints.get(&endpoint).map(|ep| ep.phase) {
            Some(EndpointPhase::Connected) | Some(EndpointPhase::Closing) => Status::Ok,
            Some(EndpointPhase::Failed(status)) => status,
            None => Status::NoElem,
        }
    }

    // --- Tagged operations ---

    /// Send `count` elements of `buffer` to `endpoint` with `tag`.
    ///
    /// The buffer is owned by the operation until it resolves and comes back
    /// in the `Completion`.
    pub fn tag_send_nb(
        &mut self,
        endpoint: EndpointId,
        buffer: Vec<u8>,
        count: usize,
        tag: Tag,
        params: &RequestParams,
    ) -> OpHandle {
        if !self.context.features.contains(Features::TAG) {
            return OpHandle::Failed(Status::Unsupported);
        }
        let Some(length) = params.datatype.byte_len(count) else {
            return OpHandle::Failed(Status::InvalidParam);
        };
        if length > buffer.len() || length > self.params.max_message_size {
            return OpHandle::Failed(Status::InvalidParam);
        }
        let Some(ep) = self.endpoints.get_mut(&endpoint) else {
            return OpHandle::Failed(Status::NotConnected);
        };
        match ep.phase {
            EndpointPhase::Connected => {}
            EndpointPhase::Closing => return OpHandle::Failed(Status::NotConnected),
            EndpointPhase::Failed(status) => return OpHandle::Failed(status),
        }

        ep.queue(PendingWrite::data(tag, buffer, length));
        let flushed = ep.flush();

        let mut immediate = None;
        for done in flushed.items {
            if done.control {
                continue;
            }
            match done.request {
                Some(request) => self
                    .requests
                    .complete(request, Completion::new(done.payload, done.length, done.tag)),
                None => immediate = Some(Completion::new(done.payload, done.length, done.tag)),
            }
        }

        if let Some(status) = flushed.error {
            if let Some(handler) = self.fail_endpoint(endpoint, status) {
                self.deferred_errors.push((handler, endpoint, status));
            }
            return match immediate {
                Some(completion) => OpHandle::Immediate(completion),
                None => OpHandle::Failed(status),
            };
        }

        match immediate {
            Some(completion) => OpHandle::Immediate(completion),
            None => {
                let request = self.requests.insert_send(endpoint);
                if let Some(ep) = self.endpoints.get_mut(&endpoint) {
                    ep.track_last(request);
                }
                OpHandle::Pending(request)
            }
        }
    }

    /// Post a receive of `count` elements for messages matching `tag`/`mask`.
    ///
    /// Messages that already arrived are matched first, oldest first.
    pub fn tag_recv_nb(
        &mut self,
        buffer: Vec<u8>,
        count: usize,
        tag: Tag,
        mask: TagMask,
        params: &RequestParams,
    ) -> OpHandle {
        if !self.context.features.contains(Features::TAG) {
            return OpHandle::Failed(Status::Unsupported);
        }
        let Some(length) = params.datatype.byte_len(count) else {
            return OpHandle::Failed(Status::InvalidParam);
        };
        if length > self.params.max_message_size {
            return OpHandle::Failed(Status::InvalidParam);
        }

        let position = self
            .unexpected
            .iter()
            .position(|msg| mask.matches(msg.tag, tag));
        if let Some(msg) = position.and_then(|p| self.unexpected.remove(p)) {
            return match fill_receive(buffer, length, msg.tag, &msg.payload) {
                Ok(completion) => OpHandle::Immediate(completion),
                Err(status) => OpHandle::Failed(status),
            };
        }

        OpHandle::Pending(self.requests.insert_recv(buffer, length, tag, mask))
    }

    // --- Requests ---

    /// Status of a pending request; `NoElem` once released.
    pub fn request_check_status(&self, request: RequestId) -> Status {
        self.requests.status(request)
    }

    /// Release a resolved request and take its outcome.
    ///
    /// A request still in progress is left alone and yields `InProgress`.
    pub fn request_release(&mut self, request: RequestId) -> Result<Completion, Status> {
        self.requests.release(request)
    }

    /// Requests issued but not yet released.
    pub fn outstanding_requests(&self) -> usize {
        self.requests.len()
    }

    /// Listeners, endpoints and pending connection requests alive.
    pub fn resource_count(&self) -> usize {
        self.listeners.len() + self.endpoints.len() + self.pending_conns.len()
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("listeners", &self.listeners.len())
            .field("pending_conns", &self.pending_conns.len())
            .field("endpoints", &self.endpoints.len())
            .field("requests", &self.requests.len())
            .field("unexpected", &self.unexpected.len())
            .field("deferred_errors", &self.deferred_errors.len())
            .finish()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Last chance for endpoints that were closed with Flush.
        for ep in self.endpoints.values_mut() {
            if ep.phase == EndpointPhase::Closing {
                let _ = ep.flush();
            }
            ep.shutdown();
        }
        tracing::trace!(
            endpoints = self.endpoints.len(),
            listeners = self.listeners.len(),
            "Worker destroyed"
        );
    }
}
