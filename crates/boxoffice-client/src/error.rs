//! Client error types.

use boxoffice_proto::{FieldError, ProtocolError, Verb};
use thiserror::Error;

/// Errors raised by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The command needs a logged-in account.
    #[error("not logged in")]
    NotLoggedIn,

    /// `login` while another account is logged in.
    #[error("already logged in as {0}")]
    AlreadyLoggedIn(String),

    /// A user-supplied value does not fit its field.
    #[error(transparent)]
    InvalidField(#[from] FieldError),

    /// The reply could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server closed the connection without replying.
    #[error("server closed the connection before replying to {0}")]
    Closed(Verb),

    /// No reply arrived in time.
    #[error("no reply to {0} within the timeout")]
    Timeout(Verb),

    /// Socket failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
