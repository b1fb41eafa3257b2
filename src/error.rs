//! Error types for transports and protocols.

use std::io;
use thiserror::Error;

/// Errors raised by transports, protocols and configuration loading.
#[derive(Error, Debug)]
pub enum Error {
    /// Admission was denied because the session registry is full.
    #[error("connection limit of {max} sessions reached")]
    MaxConnections { max: usize },

    /// Transport dial or session establishment failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A read failed mid-session.
    #[error("receive error: {0}")]
    Receive(#[source] io::Error),

    /// A write failed.
    #[error("send error: {0}")]
    Send(#[source] io::Error),

    /// A message exceeded the configured receive cap. Non-fatal: the
    /// receive buffer is reset and the session keeps running.
    #[error("received message exceeds the {limit} byte cap")]
    MessageTooLarge { limit: usize },

    /// A protocol deadline expired with the retry budget exhausted.
    #[error("protocol timeout: {0}")]
    Timeout(String),

    /// A frame checksum stayed bad after the retry budget.
    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    /// Invalid settings detected at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Authentication against the remote store failed.
    #[error("login failed: {0}")]
    Login(String),

    /// An invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

/// The error taxonomy surfaced through [`Handler::error`].
///
/// [`Handler::error`]: crate::Handler::error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MaxConnections,
    Connect,
    Receive,
    Send,
    Timeout,
    ChecksumMismatch,
    Configuration,
    Login,
    Internal,
}

impl Error {
    /// The taxonomy bucket this error reports as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MaxConnections { .. } => ErrorKind::MaxConnections,
            Error::Connect(_) => ErrorKind::Connect,
            Error::Receive(_) | Error::MessageTooLarge { .. } => ErrorKind::Receive,
            Error::Send(_) => ErrorKind::Send,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::ChecksumMismatch(_) => ErrorKind::ChecksumMismatch,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Login(_) => ErrorKind::Login,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the session must be torn down after reporting.
    ///
    /// Only the raw-protocol receive cap is recoverable: the buffer is
    /// reset and the session keeps reading.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::MessageTooLarge { .. })
    }
}

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;
