//! Endpoints: one connected peer each.
//!
//! # Responsibilities
//! - Describe how an endpoint is created (socket address or connection request)
//! - Hold the per-peer send queue and frame decoder
//! - Report peer failures to the owner through the error handler
//!
//! # Endpoint States
//! ```text
//! Connected → Closing (ep_close_nb with Flush) → removed once the queue drains
//! Connected → Failed(status) (peer error) → removed by ep_close_nb
//! ```
//!
//! # Admission Handshake
//! ```text
//! dialed endpoint:   sends stay queued until the peer's Accept frame arrives
//!                    Reject frame instead → Failed(Rejected), queued sends fail
//! accepted endpoint: Accept frame is the first thing written
//! ```

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

use crate::fabric::listener::ConnRequest;
use crate::fabric::request::RequestId;
use crate::fabric::status::Status;
use crate::fabric::tag::Tag;
use crate::fabric::wire::{Frame, FrameDecoder, FrameHeader, FrameKind, HEADER_LEN};
use crate::fabric::worker::WorkerParams;

/// Identifier of an endpoint owned by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u64);

impl EndpointId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ep-{}", self.0)
    }
}

/// How peer failures are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrHandlingMode {
    /// Failures only show up as failed requests.
    #[default]
    None,
    /// Failures additionally invoke the endpoint's error handler.
    Peer,
}

/// Callback invoked when the peer of an endpoint fails.
pub type ErrorHandler = Arc<dyn Fn(EndpointId, Status) + Send + Sync>;

/// Where a new endpoint connects to.
#[derive(Debug)]
pub enum EndpointTarget {
    /// Dial a remote listener.
    SockAddr(SocketAddr),
    /// Accept an inbound connection request.
    ConnRequest(ConnRequest),
}

/// Parameters for `Worker::ep_create`.
pub struct EndpointParams {
    pub target: EndpointTarget,
    pub err_mode: ErrHandlingMode,
    pub err_handler: Option<ErrorHandler>,
    /// Client side of a client/server connection; required for `SockAddr`.
    pub client_server: bool,
}

impl EndpointParams {
    pub fn connect(addr: SocketAddr) -> Self {
        Self {
            target: EndpointTarget::SockAddr(addr),
            err_mode: ErrHandlingMode::None,
            err_handler: None,
            client_server: false,
        }
    }

    pub fn from_request(request: ConnRequest) -> Self {
        Self {
            target: EndpointTarget::ConnRequest(request),
            err_mode: ErrHandlingMode::None,
            err_handler: None,
            client_server: false,
        }
    }

    pub fn err_mode(mut self, mode: ErrHandlingMode) -> Self {
        self.err_mode = mode;
        self
    }

    pub fn err_handler(mut self, handler: ErrorHandler) -> Self {
        self.err_handler = Some(handler);
        self
    }

    pub fn client_server(mut self) -> Self {
        self.client_server = true;
        self
    }
}

impl std::fmt::Debug for EndpointParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointParams")
            .field("target", &self.target)
            .field("err_mode", &self.err_mode)
            .field("err_handler", &self.err_handler.is_some())
            .field("client_server", &self.client_server)
            .finish()
    }
}

/// How `Worker::ep_close_nb` tears an endpoint down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Keep writing queued sends, then close.
    Flush,
    /// Drop queued sends and close now.
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EndpointPhase {
    Connected,
    Closing,
    Failed(Status),
}

/// A frame queued for writing, with the request waiting on it.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    header: [u8; HEADER_LEN],
    payload: Vec<u8>,
    length: usize,
    tag: Tag,
    written: usize,
    control: bool,
    pub request: Option<RequestId>,
}

impl PendingWrite {
    pub fn data(tag: Tag, payload: Vec<u8>, length: usize) -> Self {
        Self {
            header: FrameHeader::data(tag, length).encode(),
            payload,
            length,
            tag,
            written: 0,
            control: false,
            request: None,
        }
    }

    /// A payload-less frame written by the fabric itself.
    fn control(header: FrameHeader) -> Self {
        Self {
            header: header.encode(),
            payload: Vec::new(),
            length: 0,
            tag: header.tag,
            written: 0,
            control: true,
            request: None,
        }
    }

    fn total(&self) -> usize {
        HEADER_LEN + self.length
    }

    fn remaining(&self) -> &[u8] {
        if self.written < HEADER_LEN {
            &self.header[self.written..]
        } else {
            &self.payload[self.written - HEADER_LEN..self.length]
        }
    }
}

/// A queued write that reached the socket in full.
#[derive(Debug)]
pub(crate) struct CompletedWrite {
    /// Fabric control frame, not an application send.
    pub control: bool,
    pub request: Option<RequestId>,
    pub payload: Vec<u8>,
    pub length: usize,
    pub tag: Tag,
}

/// Outcome of a socket operation that may have partly succeeded.
#[derive(Debug)]
pub(crate) struct IoOutcome<T> {
    pub items: Vec<T>,
    pub error: Option<Status>,
}

pub(crate) struct Endpoint {
    pub id: EndpointId,
    pub peer: SocketAddr,
    pub err_mode: ErrHandlingMode,
    pub err_handler: Option<ErrorHandler>,
    pub phase: EndpointPhase,
    accepted: bool,
    stream: TcpStream,
    tx: VecDeque<PendingWrite>,
    decoder: FrameDecoder,
    rx_scratch: Vec<u8>,
}

impl Endpoint {
    pub fn new(
        id: EndpointId,
        stream: TcpStream,
        peer: SocketAddr,
        err_mode: ErrHandlingMode,
        err_handler: Option<ErrorHandler>,
        params: &WorkerParams,
    ) -> Self {
        Self {
            id,
            peer,
            err_mode,
            err_handler,
            phase: EndpointPhase::Connected,
            accepted: true,
            stream,
            tx: VecDeque::new(),
            decoder: FrameDecoder::new(params.max_message_size),
            rx_scratch: vec![0u8; params.rx_chunk_size],
        }
    }

    /// Hold every write until the peer's Accept frame arrives.
    pub fn awaiting_accept(mut self) -> Self {
        self.accepted = false;
        self
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    /// Put the Accept frame ahead of anything already queued.
    pub fn queue_accept(&mut self) {
        self.tx.push_front(PendingWrite::control(FrameHeader::accept()));
    }

    pub fn queue(&mut self, write: PendingWrite) {
        self.tx.push_back(write);
    }

    pub fn has_queued(&self) -> bool {
        !self.tx.is_empty()
    }

    /// Attach a request to the most recently queued write.
    pub fn track_last(&mut self, request: RequestId) {
        if let Some(write) = self.tx.back_mut() {
            write.request = Some(request);
        }
    }

    /// Write as much of the send queue as the socket takes right now.
    ///
    /// Writes nothing before the peer accepted the endpoint.
    pub fn flush(&mut self) -> IoOutcome<CompletedWrite> {
        let mut outcome = IoOutcome {
            items: Vec::new(),
            error: None,
        };
        if !self.accepted {
            return outcome;
        }
        while let Some(front) = self.tx.front_mut() {
            match self.stream.write(front.remaining()) {
                Ok(0) => {
                    outcome.error = Some(Status::ConnectionReset);
                    break;
                }
                Ok(n) => {
                    front.written += n;
                    if front.written == front.total() {
                        if let Some(done) = self.tx.pop_front() {
                            outcome.items.push(CompletedWrite {
                                control: done.control,
                                request: done.request,
                                payload: done.payload,
                                length: done.length,
                                tag: done.tag,
                            });
                        }
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    outcome.error = Some(Status::from(&e));
                    break;
                }
            }
        }
        outcome
    }

    /// Read what the socket has buffered (at most `max_reads` reads) and
    /// return the complete data frames.
    ///
    /// An Accept frame marks the endpoint accepted; a Reject frame fails it.
    /// Frames decoded before a failure are still returned.
    pub fn poll_read(&mut self, max_reads: usize) -> IoOutcome<Frame> {
        let mut outcome = IoOutcome {
            items: Vec::new(),
            error: None,
        };
        for _ in 0..max_reads {
            match self.stream.read(&mut self.rx_scratch) {
                Ok(0) => {
                    outcome.error = Some(Status::ConnectionReset);
                    break;
                }
                Ok(n) => self.decoder.extend(&self.rx_scratch[..n]),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    outcome.error = Some(Status::from(&e));
                    break;
                }
            }
        }

        loop {
            match self.decoder.next_frame() {
                Ok(Some(frame)) => match frame.kind {
                    FrameKind::Data => outcome.items.push(frame),
                    FrameKind::Reject => {
                        outcome.error = Some(Status::Rejected);
                        break;
                    }
                    FrameKind::Accept if !self.accepted => {
                        self.accepted = true;
                        tracing::debug!(endpoint = %self.id, peer = %self.peer, "Endpoint accepted by peer");
                    }
                    FrameKind::Accept => {
                        tracing::warn!(endpoint = %self.id, peer = %self.peer, "Duplicate accept frame");
                        outcome.error = Some(Status::Io);
                        break;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(endpoint = %self.id, peer = %self.peer, error = %e, "Protocol error");
                    outcome.error = Some(Status::Io);
                    break;
                }
            }
        }
        outcome
    }

    /// Drop everything still queued; returns the requests that were waiting.
    pub fn drain_queue(&mut self) -> Vec<RequestId> {
        self.tx.drain(..).filter_map(|w| w.request).collect()
    }

    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (Endpoint, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let params = WorkerParams {
            rx_chunk_size: 64,
            max_message_size: 1024,
            ..WorkerParams::default()
        };
        let ep = Endpoint::new(
            EndpointId::from_raw(1),
            server,
            peer,
            ErrHandlingMode::Peer,
            None,
            &params,
        );
        (ep, client)
    }

    fn poll_until_error(ep: &mut Endpoint) -> Option<Status> {
        for _ in 0..1000 {
            let outcome = ep.poll_read(8);
            if outcome.error.is_some() {
                return outcome.error;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn test_flush_writes_frame() {
        let (mut ep, mut client) = pair();
        ep.queue(PendingWrite::data(Tag(5), vec![1, 2, 3, 9], 3));
        ep.track_last(RequestId::from_raw(11));

        let outcome = ep.flush();
        assert!(outcome.error.is_none());
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].length, 3);
        assert!(!ep.has_queued());

        let mut bytes = vec![0u8; HEADER_LEN + 3];
        client.read_exact(&mut bytes).unwrap();
        let header = FrameHeader::decode(&bytes).unwrap();
        assert_eq!(header.tag, Tag(5));
        assert_eq!(header.len, 3);
        assert_eq!(&bytes[HEADER_LEN..], &[1, 2, 3]);
    }

    #[test]
    fn test_poll_read_returns_frames_before_eof() {
        let (mut ep, mut client) = pair();
        client.write_all(&FrameHeader::data(Tag(0), 2).encode()).unwrap();
        client.write_all(&[7, 8]).unwrap();
        drop(client);

        let mut frames = Vec::new();
        let mut error = None;
        for _ in 0..1000 {
            let outcome = ep.poll_read(8);
            frames.extend(outcome.items);
            if outcome.error.is_some() {
                error = outcome.error;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![7, 8]);
        assert_eq!(error, Some(Status::ConnectionReset));
    }

    #[test]
    fn test_reject_frame_fails_endpoint() {
        let (mut ep, mut client) = pair();
        client.write_all(&FrameHeader::reject().encode()).unwrap();

        assert_eq!(poll_until_error(&mut ep), Some(Status::Rejected));
    }

    #[test]
    fn test_writes_wait_for_accept() {
        let (ep, mut client) = pair();
        let mut ep = ep.awaiting_accept();
        ep.queue(PendingWrite::data(Tag(1), vec![5, 6], 2));

        assert!(ep.flush().items.is_empty());
        assert!(ep.has_queued());
        client.set_nonblocking(true).unwrap();
        let mut byte = [0u8; 1];
        assert_eq!(client.read(&mut byte).unwrap_err().kind(), ErrorKind::WouldBlock);

        client.write_all(&FrameHeader::accept().encode()).unwrap();
        for _ in 0..1000 {
            assert!(ep.poll_read(8).error.is_none());
            if ep.is_accepted() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(ep.is_accepted());

        let outcome = ep.flush();
        assert_eq!(outcome.items.len(), 1);
        assert!(!outcome.items[0].control);
    }

    #[test]
    fn test_accept_is_written_first() {
        let (mut ep, mut client) = pair();
        ep.queue(PendingWrite::data(Tag(2), vec![1], 1));
        ep.queue_accept();

        let outcome = ep.flush();
        assert_eq!(outcome.items.len(), 2);
        assert!(outcome.items[0].control);

        let mut bytes = vec![0u8; 2 * HEADER_LEN + 1];
        client.read_exact(&mut bytes).unwrap();
        assert_eq!(FrameHeader::decode(&bytes).unwrap().kind, FrameKind::Accept);
        assert_eq!(FrameHeader::decode(&bytes[HEADER_LEN..]).unwrap().kind, FrameKind::Data);
    }

    #[test]
    fn test_second_accept_is_protocol_error() {
        let (mut ep, mut client) = pair();
        client.write_all(&FrameHeader::accept().encode()).unwrap();
        assert_eq!(poll_until_error(&mut ep), Some(Status::Io));
    }
}
