//! Status codes returned by every fabric call.

use std::io;

/// Completion status of a fabric call or request.
///
/// `Ok` and `InProgress` are not failures; every other variant is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The call or request finished successfully.
    Ok,
    /// The request has not finished yet.
    InProgress,
    /// The operation is not supported by this fabric or context.
    Unsupported,
    /// A parameter was out of range or inconsistent.
    InvalidParam,
    /// The address could not be parsed or is not usable.
    InvalidAddr,
    /// No such element (unknown id, already released request).
    NoElem,
    /// The element already exists.
    AlreadyExists,
    /// No endpoint is connected.
    NotConnected,
    /// The destination could not be reached.
    Unreachable,
    /// The peer refused the connection.
    Rejected,
    /// The remote peer closed or reset the connection.
    ConnectionReset,
    /// The incoming message did not fit the posted receive.
    MessageTruncated,
    /// The request was canceled because its endpoint went away.
    Canceled,
    /// The resource is busy (address in use).
    Busy,
    /// Any other I/O failure.
    Io,
}

impl Status {
    /// Human-readable description of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "success",
            Status::InProgress => "operation in progress",
            Status::Unsupported => "operation is not supported",
            Status::InvalidParam => "invalid parameter",
            Status::InvalidAddr => "invalid address",
            Status::NoElem => "no such element",
            Status::AlreadyExists => "element already exists",
            Status::NotConnected => "endpoint is not connected",
            Status::Unreachable => "destination is unreachable",
            Status::Rejected => "connection request rejected",
            Status::ConnectionReset => "connection reset by remote peer",
            Status::MessageTruncated => "message truncated",
            Status::Canceled => "request canceled",
            Status::Busy => "device is busy",
            Status::Io => "input/output error",
        }
    }

    /// Short snake_case name, used as a metric label.
    pub fn name(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::InProgress => "in_progress",
            Status::Unsupported => "unsupported",
            Status::InvalidParam => "invalid_param",
            Status::InvalidAddr => "invalid_addr",
            Status::NoElem => "no_elem",
            Status::AlreadyExists => "already_exists",
            Status::NotConnected => "not_connected",
            Status::Unreachable => "unreachable",
            Status::Rejected => "rejected",
            Status::ConnectionReset => "connection_reset",
            Status::MessageTruncated => "message_truncated",
            Status::Canceled => "canceled",
            Status::Busy => "busy",
            Status::Io => "io",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Status::InProgress)
    }

    /// True for every terminal failure.
    pub fn is_err(&self) -> bool {
        !self.is_ok() && !self.is_in_progress()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for Status {}

impl From<&io::Error> for Status {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Status::Unreachable,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Status::ConnectionReset,
            io::ErrorKind::NotConnected => Status::NotConnected,
            io::ErrorKind::AddrInUse => Status::Busy,
            io::ErrorKind::AddrNotAvailable => Status::InvalidAddr,
            io::ErrorKind::InvalidInput => Status::InvalidParam,
            io::ErrorKind::TimedOut => Status::Unreachable,
            _ => Status::Io,
        }
    }
}
