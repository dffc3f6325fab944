//! Demo drivers behind the `tagwire` binary.
//!
//! The client sends `count` consecutive integers starting at `start` as
//! little-endian `u32`s; the server accepts one client and receives exactly
//! that many bytes. Both sides agree on `count` out of band.

use std::mem::size_of;
use std::net::SocketAddr;

use byteorder::{ByteOrder, LittleEndian};

use crate::config::{DemoConfig, SessionConfig};
use crate::session::{ConnectionAcceptor, ConnectionInitiator, TransportError};

/// Payload length in bytes for `count` integers.
pub fn payload_len(count: usize) -> usize {
    count * size_of::<u32>()
}

/// `start, start + 1, ...` (`count` values) as little-endian bytes.
pub fn encode_sequence(start: u32, count: usize) -> Vec<u8> {
    let values: Vec<u32> = (0..count as u32).map(|i| start.wrapping_add(i)).collect();
    let mut bytes = vec![0u8; payload_len(count)];
    LittleEndian::write_u32_into(&values, &mut bytes);
    bytes
}

/// Decode little-endian `u32`s; a trailing partial value is ignored.
pub fn decode_values(bytes: &[u8]) -> Vec<u32> {
    let whole = bytes.len() / size_of::<u32>();
    let mut values = vec![0u32; whole];
    LittleEndian::read_u32_into(&bytes[..payload_len(whole)], &mut values);
    values
}

/// Accept one client and receive `demo.count` integers from it.
pub async fn run_server(config: &SessionConfig, demo: &DemoConfig) -> Result<Vec<u32>, TransportError> {
    let (server, _) = start_listening(config, demo)?;
    serve(server, demo).await
}

/// Create an acceptor listening on the demo address; returns the bound address.
pub fn start_listening(
    config: &SessionConfig,
    demo: &DemoConfig,
) -> Result<(ConnectionAcceptor, SocketAddr), TransportError> {
    let mut server = ConnectionAcceptor::with_config(config)?;
    let local_addr = server.listen(&demo.address, demo.port)?;
    tracing::info!(address = %local_addr, "Server started, waiting for a client");
    Ok((server, local_addr))
}

/// Admit one client on a listening acceptor and receive `demo.count` integers.
pub async fn serve(mut server: ConnectionAcceptor, demo: &DemoConfig) -> Result<Vec<u32>, TransportError> {
    server.wait_for_client_async().await?;
    server.bind_endpoint()?;

    let length = payload_len(demo.count);
    let handle = server.receive_message(vec![0u8; length], length);
    let completion = server.session_mut().wait_for_completion_async(handle).await?;

    tracing::info!(bytes = completion.length(), tag = %completion.tag(), "Message received");
    Ok(decode_values(completion.data()))
}

/// Connect to the server and send `demo.count` integers starting at `demo.start`.
pub async fn run_client(config: &SessionConfig, demo: &DemoConfig) -> Result<usize, TransportError> {
    let mut client = ConnectionInitiator::with_config(config)?;
    client.connect(&demo.address, demo.port)?;

    let payload = encode_sequence(demo.start, demo.count);
    let length = payload.len();
    let handle = client.send_message(payload, length);
    let completion = client.session_mut().wait_for_completion_async(handle).await?;

    tracing::info!(bytes = completion.length(), "Message sent");
    Ok(completion.length())
}
