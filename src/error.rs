//! Error types

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Connection-level and configuration errors
#[derive(Debug, Error)]
pub enum Error {
    /// Socket I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Wire protocol violation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// TLS session failure
    #[error("tls error: {0}")]
    Tls(String),

    /// The connection is closed
    #[error("connection closed")]
    ConnectionClosed,

    /// No capacity left for another request
    #[error("connection busy: {0}")]
    ConnectionBusy(String),

    /// The connection hit a fatal error and no longer performs I/O
    #[error("connection is defunct")]
    Defunct,

    /// The connection has not finished its handshake, or is shutting down
    #[error("connection not ready (state: {0})")]
    NotReady(String),

    /// Invalid state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state description
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Connecting or the startup handshake failed
    #[error("startup failed: {0}")]
    Startup(String),

    /// A single request failed
    #[error(transparent)]
    Request(#[from] RequestError),
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::Tls(err.to_string())
    }
}

/// Failure reported to a request's response callback
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    /// The request bytes could not be written to the socket
    #[error("unable to write to socket: {0}")]
    Write(String),

    /// The request frame could not be built
    #[error("unable to build request: {0}")]
    Prepare(String),

    /// Every stream id on the connection is in use
    #[error("no streams available")]
    NoStreamsAvailable,

    /// The connection is defunct
    #[error("connection is defunct")]
    Defunct,

    /// The connection is not ready to accept requests
    #[error("connection not ready")]
    NotReady,

    /// The socket closed before a response arrived
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// No response within the configured write or read timeout
    #[error("request timed out")]
    Timeout,

    /// The server answered with an ERROR frame
    #[error("server error 0x{code:04X}: {message}")]
    Server {
        /// Protocol error code
        code: i32,
        /// Server supplied message
        message: String,
    },
}

impl RequestError {
    /// Protocol error code when the server produced this error
    pub fn server_code(&self) -> Option<i32> {
        match self {
            RequestError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_converts_into_error() {
        let err: Error = RequestError::Timeout.into();
        assert!(matches!(err, Error::Request(RequestError::Timeout)));
        assert_eq!(err.to_string(), "request timed out");
    }

    #[test]
    fn test_server_error_display() {
        let err = RequestError::Server {
            code: 0x2200,
            message: "unconfigured table".into(),
        };
        assert_eq!(err.to_string(), "server error 0x2200: unconfigured table");
        assert_eq!(err.server_code(), Some(0x2200));
        assert_eq!(RequestError::NotReady.server_code(), None);
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
