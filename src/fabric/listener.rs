//! Listeners and inbound connection requests.
//!
//! # Responsibilities
//! - Bind a non-blocking TCP listener to the requested address
//! - Turn every accepted socket into a `ConnRequest` handed to the
//!   listener's admission handler during `Worker::progress`
//! - Refuse requests the handler hands back (reject frame, then close)
//! - Admitted requests get an accept frame once an endpoint is created

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

use crate::fabric::status::Status;
use crate::fabric::wire::FrameHeader;

/// Identifier of a listener owned by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ConnRequestId(u64);

impl ConnRequestId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// One inbound connection attempt.
///
/// Move-only: creating an endpoint from it or rejecting it consumes it, so a
/// request is resolved at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct ConnRequest {
    pub(crate) id: ConnRequestId,
    pub(crate) listener: ListenerId,
    pub(crate) client_addr: Option<SocketAddr>,
}

impl ConnRequest {
    /// Listener that produced this request.
    pub fn listener(&self) -> ListenerId {
        self.listener
    }

    /// Query diagnostic attributes of the request.
    ///
    /// Fails with `Unsupported` when the peer address is not known.
    pub fn query(&self) -> Result<ConnRequestAttr, Status> {
        match self.client_addr {
            Some(client_addr) => Ok(ConnRequestAttr { client_addr }),
            None => Err(Status::Unsupported),
        }
    }
}

impl std::fmt::Display for ConnRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-req-{}@{}", self.id.0, self.listener)
    }
}

/// Attributes reported by `ConnRequest::query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnRequestAttr {
    pub client_addr: SocketAddr,
}

/// Decision of an admission handler.
#[derive(Debug)]
pub enum Admission {
    /// The handler kept the request.
    Held,
    /// The handler refused the request; the worker rejects it right away.
    Refused(ConnRequest),
}

/// Admission handler invoked once per inbound connection attempt.
pub type ConnHandler = Box<dyn FnMut(ConnRequest) -> Admission + Send>;

/// Parameters for `Worker::listener_create`.
pub struct ListenerParams {
    pub sockaddr: SocketAddr,
    pub conn_handler: ConnHandler,
}

impl ListenerParams {
    pub fn new(sockaddr: SocketAddr, conn_handler: ConnHandler) -> Self {
        Self {
            sockaddr,
            conn_handler,
        }
    }
}

impl std::fmt::Debug for ListenerParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerParams")
            .field("sockaddr", &self.sockaddr)
            .finish_non_exhaustive()
    }
}

pub(crate) struct ListenerState {
    pub inner: TcpListener,
    pub local_addr: SocketAddr,
    pub handler: ConnHandler,
}

impl ListenerState {
    pub fn bind(params: ListenerParams) -> Result<Self, Status> {
        let inner = TcpListener::bind(params.sockaddr).map_err(|e| {
            tracing::error!(address = %params.sockaddr, error = %e, "Failed to bind listener");
            Status::from(&e)
        })?;
        inner.set_nonblocking(true).map_err(|e| Status::from(&e))?;
        let local_addr = inner.local_addr().map_err(|e| Status::from(&e))?;

        tracing::info!(address = %local_addr, "Listener bound");

        Ok(Self {
            inner,
            local_addr,
            handler: params.conn_handler,
        })
    }

    /// Accept one pending connection, if any.
    pub fn try_accept(&self) -> Result<Option<(TcpStream, Option<SocketAddr>)>, Status> {
        match self.inner.accept() {
            Ok((stream, addr)) => {
                stream.set_nonblocking(true).map_err(|e| Status::from(&e))?;
                Ok(Some((stream, Some(addr))))
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => {
                tracing::warn!(address = %self.local_addr, error = %e, "Accept failed");
                Err(Status::from(&e))
            }
        }
    }
}

/// An accepted socket waiting for its request to be resolved.
#[derive(Debug)]
pub(crate) struct PendingConn {
    pub stream: TcpStream,
    pub listener: ListenerId,
}

impl PendingConn {
    /// Tell the peer it was refused and close the socket.
    ///
    /// Fabric clients hold their sends until admitted, so anything unread is
    /// foreign traffic. It is drained first so the close does not reset the
    /// connection before the peer reads the reject frame.
    pub fn refuse(mut self) -> Result<(), Status> {
        let mut scratch = [0u8; 4096];
        loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let frame = FrameHeader::reject().encode();
        let written = self.stream.write(&frame).map_err(|e| Status::from(&e))?;
        if written < frame.len() {
            return Err(Status::Busy);
        }
        let _ = self.stream.shutdown(Shutdown::Write);
        Ok(())
    }
}
