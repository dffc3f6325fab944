//! Shared utilities for session integration tests.

#![allow(dead_code)]

use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use tagwire::fabric::wire::{FrameHeader, FrameKind, HEADER_LEN};
use tagwire::{ConnectionAcceptor, ConnectionInitiator};

/// Upper bound for every progress loop in the tests.
pub const DEADLINE: Duration = Duration::from_secs(10);

/// Acceptor listening on an ephemeral loopback port.
pub fn listening_server() -> (ConnectionAcceptor, SocketAddr) {
    let mut server = ConnectionAcceptor::new().unwrap();
    let addr = server.listen("127.0.0.1", 0).unwrap();
    (server, addr)
}

/// Server and client with endpoints bound on both sides.
pub fn connected_pair() -> (ConnectionAcceptor, ConnectionInitiator) {
    let (mut server, addr) = listening_server();
    let mut client = ConnectionInitiator::new().unwrap();
    client.connect("127.0.0.1", addr.port()).unwrap();
    server.wait_for_client().unwrap();
    server.bind_endpoint().unwrap();
    (server, client)
}

/// A plain TCP connection attempt, not driven by any worker.
pub fn raw_attempt(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_nonblocking(true).unwrap();
    stream
}

/// Result of peeking at a raw attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawOutcome {
    /// Nothing arrived yet.
    Waiting,
    /// A reject frame arrived.
    Rejected,
    /// An accept frame arrived.
    Accepted,
    /// The server closed without a reject frame.
    Closed,
}

/// Non-blocking check of a raw attempt; `buf` accumulates partial reads.
pub fn poll_raw(stream: &mut TcpStream, buf: &mut Vec<u8>) -> RawOutcome {
    let mut scratch = [0u8; 64];
    loop {
        if buf.len() >= HEADER_LEN {
            let header = FrameHeader::decode(buf).unwrap();
            return match header.kind {
                FrameKind::Reject => RawOutcome::Rejected,
                FrameKind::Accept => RawOutcome::Accepted,
                FrameKind::Data => RawOutcome::Closed,
            };
        }
        match stream.read(&mut scratch) {
            Ok(0) => return RawOutcome::Closed,
            Ok(n) => buf.extend_from_slice(&scratch[..n]),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => return RawOutcome::Waiting,
            Err(_) => return RawOutcome::Closed,
        }
    }
}

/// Progress `server` until `raw` sees a verdict or the deadline passes.
pub fn await_raw_verdict(server: &mut ConnectionAcceptor, raw: &mut TcpStream) -> RawOutcome {
    let mut buf = Vec::new();
    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        server.session_mut().progress();
        match poll_raw(raw, &mut buf) {
            RawOutcome::Waiting => std::thread::sleep(Duration::from_millis(1)),
            verdict => return verdict,
        }
    }
    RawOutcome::Waiting
}

/// Poll a raw attempt without progressing anything until it sees a verdict.
pub fn await_raw_outcome(raw: &mut TcpStream) -> RawOutcome {
    let mut buf = Vec::new();
    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        match poll_raw(raw, &mut buf) {
            RawOutcome::Waiting => std::thread::sleep(Duration::from_millis(1)),
            verdict => return verdict,
        }
    }
    RawOutcome::Waiting
}

/// Progress both sides for a while.
pub fn progress_both(server: &mut ConnectionAcceptor, client: &mut ConnectionInitiator, rounds: usize) {
    for _ in 0..rounds {
        server.session_mut().progress();
        client.session_mut().progress();
        std::thread::sleep(Duration::from_millis(1));
    }
}
