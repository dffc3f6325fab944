//! Tag-matched point-to-point messaging over TCP.

pub mod config;
pub mod demo;
pub mod fabric;
pub mod observability;
pub mod session;

pub use config::schema::SessionConfig;
pub use session::{ConnectionAcceptor, ConnectionInitiator, TransportError, TransportSession};
