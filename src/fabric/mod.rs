//! Messaging fabric subsystem.
//!
//! # Data Flow
//! ```text
//! Context::init (feature negotiation, config snapshot)
//!     → Worker::create (progress engine)
//!     → listener.rs (bind, accept → ConnRequest → admission handler)
//!     → endpoint.rs (one peer per endpoint, send queue, frame decoder)
//!     → wire.rs (data / reject frames on the socket)
//!     → request.rs (OpHandle, request arena, tag matching via tag.rs)
//!
//! Request States:
//!     Immediate | Failed | Pending → (progress) → released
//! ```
//!
//! # Design Decisions
//! - Single-threaded cooperative: nothing moves unless `Worker::progress` runs
//! - Buffers move into operations and come back in the completion
//! - Connection requests are move-only, so each is resolved at most once
//! - All failures are reported as `Status` values

pub mod context;
pub mod endpoint;
pub mod listener;
pub mod request;
pub mod status;
pub mod tag;
pub mod wire;
pub mod worker;

pub use context::{Context, ContextParams, Features};
pub use endpoint::{
    CloseMode, EndpointId, EndpointParams, EndpointTarget, ErrHandlingMode, ErrorHandler,
};
pub use listener::{Admission, ConnHandler, ConnRequest, ConnRequestAttr, ListenerId, ListenerParams};
pub use request::{Completion, Datatype, OpHandle, RequestId, RequestParams};
pub use status::Status;
pub use tag::{Tag, TagMask};
pub use worker::{Worker, WorkerParams};
