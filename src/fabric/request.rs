//! Operation handles and the request arena.
//!
//! # State Transitions
//! ```text
//! tag_send_nb / tag_recv_nb
//!     → finished on the spot        → OpHandle::Immediate(Completion)
//!     → rejected on the spot        → OpHandle::Failed(Status)
//!     → queued                      → OpHandle::Pending(RequestId)
//!
//! Pending request (arena entry):
//!     InProgress → Done | Failed    (driven by Worker::progress)
//!     Done | Failed → removed       (Worker::request_release)
//! ```
//!
//! An id is released exactly once; after that the arena answers `NoElem`.

use std::collections::{HashMap, VecDeque};

use crate::fabric::endpoint::EndpointId;
use crate::fabric::status::Status;
use crate::fabric::tag::{Tag, TagMask};

/// Identifier of an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Element layout of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    /// Contiguous elements of the given size in bytes.
    Contig(usize),
}

impl Datatype {
    /// Number of bytes covered by `count` elements.
    pub fn byte_len(&self, count: usize) -> Option<usize> {
        match self {
            Datatype::Contig(elem_size) if *elem_size > 0 => count.checked_mul(*elem_size),
            Datatype::Contig(_) => None,
        }
    }
}

/// Per-operation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestParams {
    pub datatype: Datatype,
}

impl Default for RequestParams {
    fn default() -> Self {
        Self {
            datatype: Datatype::Contig(1),
        }
    }
}

/// Result of a finished send or receive.
///
/// The buffer handed to the operation comes back here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    buffer: Vec<u8>,
    length: usize,
    tag: Tag,
}

impl Completion {
    pub(crate) fn new(buffer: Vec<u8>, length: usize, tag: Tag) -> Self {
        Self {
            buffer,
            length,
            tag,
        }
    }

    /// Bytes sent or received.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Tag of the message (sender tag for receives).
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// The transferred bytes.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.length]
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

/// Handle to a non-blocking operation.
#[must_use = "an operation handle must be driven to completion"]
#[derive(Debug)]
pub enum OpHandle {
    /// The operation finished inside the call.
    Immediate(Completion),
    /// The operation failed inside the call.
    Failed(Status),
    /// The operation is in flight; poll the worker until it resolves.
    Pending(RequestId),
}

impl OpHandle {
    pub fn is_pending(&self) -> bool {
        matches!(self, OpHandle::Pending(_))
    }

    /// Status as known without progressing the worker.
    pub fn status(&self) -> Status {
        match self {
            OpHandle::Immediate(_) => Status::Ok,
            OpHandle::Failed(status) => *status,
            OpHandle::Pending(_) => Status::InProgress,
        }
    }
}

#[derive(Debug)]
pub(crate) enum RequestState {
    /// Payload is queued on the endpoint's send queue.
    Send { endpoint: EndpointId },
    /// Posted receive waiting for a matching message.
    Recv {
        buffer: Vec<u8>,
        length: usize,
        tag: Tag,
        mask: TagMask,
    },
    Done(Completion),
    Failed(Status),
}

impl RequestState {
    fn status(&self) -> Status {
        match self {
            RequestState::Send { .. } | RequestState::Recv { .. } => Status::InProgress,
            RequestState::Done(_) => Status::Ok,
            RequestState::Failed(status) => *status,
        }
    }
}

/// Owns every request that did not resolve inside its issuing call.
#[derive(Debug, Default)]
pub(crate) struct RequestArena {
    next_id: u64,
    entries: HashMap<RequestId, RequestState>,
    /// Posted receives in posting order; matching walks this front to back.
    posted: VecDeque<RequestId>,
}

impl RequestArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_send(&mut self, endpoint: EndpointId) -> RequestId {
        let id = self.allocate();
        self.entries.insert(id, RequestState::Send { endpoint });
        id
    }

    pub fn insert_recv(&mut self, buffer: Vec<u8>, length: usize, tag: Tag, mask: TagMask) -> RequestId {
        let id = self.allocate();
        self.entries.insert(
            id,
            RequestState::Recv {
                buffer,
                length,
                tag,
                mask,
            },
        );
        self.posted.push_back(id);
        id
    }

    fn allocate(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId::from_raw(self.next_id)
    }

    pub fn status(&self, id: RequestId) -> Status {
        self.entries
            .get(&id)
            .map(RequestState::status)
            .unwrap_or(Status::NoElem)
    }

    /// Number of requests not yet released, resolved or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn complete(&mut self, id: RequestId, completion: Completion) {
        if let Some(state) = self.entries.get_mut(&id) {
            *state = RequestState::Done(completion);
        }
    }

    pub fn fail(&mut self, id: RequestId, status: Status) {
        if let Some(state) = self.entries.get_mut(&id) {
            *state = RequestState::Failed(status);
        }
        self.posted.retain(|posted| *posted != id);
    }

    /// Remove a resolved request and hand back its outcome.
    ///
    /// An in-progress request stays in the arena and yields `InProgress`.
    pub fn release(&mut self, id: RequestId) -> Result<Completion, Status> {
        match self.entries.get(&id).map(RequestState::status) {
            None => Err(Status::NoElem),
            Some(Status::InProgress) => Err(Status::InProgress),
            Some(_) => match self.entries.remove(&id) {
                Some(RequestState::Done(completion)) => Ok(completion),
                Some(RequestState::Failed(status)) => Err(status),
                _ => Err(Status::NoElem),
            },
        }
    }

    /// Hand an incoming message to the oldest matching posted receive.
    ///
    /// Returns the payload back when nothing matches.
    pub fn deliver(&mut self, sender_tag: Tag, payload: Vec<u8>) -> Option<Vec<u8>> {
        let position = self.posted.iter().position(|id| {
            matches!(
                self.entries.get(id),
                Some(RequestState::Recv { tag, mask, .. }) if mask.matches(sender_tag, *tag)
            )
        });
        let Some(position) = position else {
            return Some(payload);
        };
        let Some(id) = self.posted.remove(position) else {
            return Some(payload);
        };
        if let Some(RequestState::Recv { buffer, length, .. }) = self.entries.remove(&id) {
            let state = match fill_receive(buffer, length, sender_tag, &payload) {
                Ok(completion) => RequestState::Done(completion),
                Err(status) => RequestState::Failed(status),
            };
            self.entries.insert(id, state);
        }
        None
    }

    /// Fail every send still queued on `endpoint`.
    pub fn fail_sends_on(&mut self, endpoint: EndpointId, status: Status) -> usize {
        let mut failed = 0;
        for state in self.entries.values_mut() {
            if matches!(state, RequestState::Send { endpoint: ep } if *ep == endpoint) {
                *state = RequestState::Failed(status);
                failed += 1;
            }
        }
        failed
    }
}

/// Copy `payload` into a receive buffer of `length` bytes.
///
/// A payload longer than the receive fills the buffer and reports truncation.
pub(crate) fn fill_receive(
    mut buffer: Vec<u8>,
    length: usize,
    sender_tag: Tag,
    payload: &[u8],
) -> Result<Completion, Status> {
    if buffer.len() < length {
        buffer.resize(length, 0);
    }
    let copied = payload.len().min(length);
    buffer[..copied].copy_from_slice(&payload[..copied]);
    if payload.len() > length {
        return Err(Status::MessageTruncated);
    }
    Ok(Completion::new(buffer, copied, sender_tag))
}
