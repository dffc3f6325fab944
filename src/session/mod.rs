//! Point-to-point session layer.
//!
//! # Data Flow
//! ```text
//! ConnectionAcceptor (server)             ConnectionInitiator (client)
//!     listen()                                 connect()
//!     → admission handler stores the           → outbound endpoint
//!       first request, refuses the rest
//!     → bind_endpoint()
//!     → receive_message()          ◀────────   send_message()
//!     → TransportSession::wait_for_completion (spin on progress)
//! ```
//!
//! # Design Decisions
//! - Both roles own a `TransportSession` instead of extending one
//! - Tag 0 everywhere, full receive mask, raw fixed-length payloads
//! - Setup failures are raised; peer failures are logged and counted only

pub mod acceptor;
pub mod address;
pub mod error;
pub mod initiator;
pub mod transport;

pub use acceptor::{admit, AcceptorState, AdmissionSlot, ConnectionAcceptor};
pub use address::{prepare_socket_address, AddressRole};
pub use error::{SetupStage, TransportError};
pub use initiator::ConnectionInitiator;
pub use transport::TransportSession;
