//! Error taxonomy for the SDK.
//!
//! Three layers, matching the runtime layers they originate from:
//!
//! - [`SocketError`]: framed-socket failures (connect, ack, ping).
//! - [`IoError`]: per-transaction I/O failures delivered to handler code.
//! - [`HostError`]: orchestration failures on the host controller.
//!
//! Schema-parse failures on inbound wire data are [`ValidationError`];
//! they are logged and dropped at the layer that hit them and never kill
//! the connection.

use std::fmt;

/// Errors raised by the framed message socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    /// The connect handshake did not complete in time.
    ConnectTimeout,
    /// A framed send or ping did not receive its acknowledgement in time.
    Timeout,
    /// The socket is not open.
    NotConnected,
    /// The underlying transport failed.
    Transport(String),
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectTimeout => write!(f, "Connect handshake timed out"),
            Self::Timeout => write!(f, "Timed out waiting for acknowledgement"),
            Self::NotConnected => write!(f, "Socket not connected"),
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
        }
    }
}

impl std::error::Error for SocketError {}

/// Errors raised by the RPC multiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The underlying socket is gone; the call must be re-initiated.
    NotConnected,
    /// No response arrived within the call's response window.
    Timeout,
    /// The peer's response did not match the method's output shape.
    BadResponse(String),
    /// The framed send itself failed.
    Socket(SocketError),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "RPC channel not connected"),
            Self::Timeout => write!(f, "RPC call timed out"),
            Self::BadResponse(msg) => write!(f, "Malformed RPC response: {msg}"),
            Self::Socket(e) => write!(f, "RPC send failed: {e}"),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<SocketError> for RpcError {
    fn from(e: SocketError) -> Self {
        match e {
            SocketError::NotConnected => Self::NotConnected,
            SocketError::Timeout => Self::Timeout,
            other => Self::Socket(other),
        }
    }
}

/// Failure kinds surfaced to handler code awaiting I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorKind {
    /// The transaction was canceled by the service or the end user.
    Canceled,
    /// The transaction was closed on the host side.
    TransactionClosed,
    /// The service reply did not match the expected shape.
    BadResponse,
    /// The render could not be issued (for example, one is already
    /// outstanding).
    RenderError,
}

impl IoErrorKind {
    /// Stable string form used in serialized results.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Canceled => "CANCELED",
            Self::TransactionClosed => "TRANSACTION_CLOSED",
            Self::BadResponse => "BAD_RESPONSE",
            Self::RenderError => "RENDER_ERROR",
        }
    }
}

/// Error delivered to handler code when a pending I/O call fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoError {
    /// What went wrong.
    pub kind: IoErrorKind,
    /// Optional human-readable detail.
    pub message: Option<String>,
}

impl IoError {
    /// Construct an error with no detail message.
    pub fn new(kind: IoErrorKind) -> Self {
        Self { kind, message: None }
    }

    /// Construct an error with a detail message.
    pub fn with_message(kind: IoErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    /// Shorthand for a cancellation error.
    pub fn canceled() -> Self {
        Self::new(IoErrorKind::Canceled)
    }

    /// Shorthand for a transaction-closed error.
    pub fn transaction_closed() -> Self {
        Self::new(IoErrorKind::TransactionClosed)
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.kind.as_str()),
            None => write!(f, "{}", self.kind.as_str()),
        }
    }
}

impl std::error::Error for IoError {}

/// Schema-parse failure on inbound wire data.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// What failed to parse, and why.
    pub message: String,
}

impl ValidationError {
    /// Construct a validation error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed: {}", self.message)
    }
}

impl std::error::Error for ValidationError {}

impl From<serde_json::Error> for ValidationError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Orchestration errors on the host controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The service rejected the API key during initialization.
    InvalidApiKey,
    /// A graceful shutdown is in progress; new work is refused.
    ShutdownInProgress,
    /// The host has not completed initialization.
    NotInitialized,
    /// Ambient transaction context was read outside a transaction.
    NoTransactionContext,
    /// Anything else the controller cannot classify.
    Internal(String),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidApiKey => write!(f, "Invalid API key"),
            Self::ShutdownInProgress => write!(f, "Host shutdown in progress"),
            Self::NotInitialized => write!(f, "Host not initialized"),
            Self::NoTransactionContext => {
                write!(f, "No transaction context bound on this task")
            }
            Self::Internal(msg) => write!(f, "Host error: {msg}"),
        }
    }
}

impl std::error::Error for HostError {}
