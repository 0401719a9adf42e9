//! Runtime error type.
//!
//! `ServerError` covers everything outside the driver: binding sockets,
//! opening storage, reading a request off a connection. Driver failures are
//! wrapped so callers see one type.

use std::fmt;

use crate::server_error::DriverError;

/// Errors raised by the server runtime.
#[derive(Debug)]
pub enum ServerError {
    /// Unusable bind address or data directory. Only raised at startup.
    Config(String),

    /// Socket failure or read timeout.
    ///
    /// Fatal while binding. Afterwards it only ends the connection it
    /// happened on.
    Transport(String),

    /// The peer went away without sending a request.
    Protocol(String),

    /// Request handling failed inside [`crate::ServerDriver`].
    Driver(DriverError),
}

impl ServerError {
    /// Whether the error ends one connection rather than the server.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Protocol(_))
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Driver(err) => write!(f, "driver error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Self::Driver(err) = self { Some(err) } else { None }
    }
}

impl From<DriverError> for ServerError {
    fn from(err: DriverError) -> Self {
        Self::Driver(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
