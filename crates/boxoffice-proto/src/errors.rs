//! Protocol error types.

use thiserror::Error;

use crate::{FieldError, Transport, Verb};

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while decoding requests or responses.
///
/// Request-side errors decide the reply the server sends back:
/// [`ProtocolError::reply_verb`] returns the verb whose tag prefixes the
/// `ERR` status, or `None` for the untagged `ERR` line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The leading token is not one of the protocol verbs.
    #[error("unknown verb {0:?}")]
    UnknownVerb(String),

    /// A known verb arrived on the transport it is not bound to.
    #[error("{verb} is not accepted over {transport}")]
    WrongTransport {
        /// Verb that was received
        verb: Verb,
        /// Transport it arrived on
        transport: Transport,
    },

    /// Wrong number of arguments for a known verb.
    #[error("{verb} expects {expected} arguments, got {got}")]
    ArgumentCount {
        /// Verb being parsed
        verb: Verb,
        /// Arguments the grammar requires
        expected: usize,
        /// Arguments present
        got: usize,
    },

    /// An argument violates its field format.
    #[error("{verb}: {source}")]
    InvalidField {
        /// Verb being parsed
        verb: Verb,
        /// Which field failed and why
        #[source]
        source: FieldError,
    },

    /// Declared payload exceeds the configured limit.
    #[error("{verb} declares {size} payload bytes, limit is {max}")]
    PayloadTooLarge {
        /// Verb being parsed
        verb: Verb,
        /// Declared size
        size: u64,
        /// Configured limit
        max: u64,
    },

    /// Input ended before the declared payload was complete.
    #[error("{verb} payload truncated: got {received} of {expected} bytes")]
    Truncated {
        /// Verb being parsed
        verb: Verb,
        /// Declared size
        expected: usize,
        /// Bytes actually received
        received: usize,
    },

    /// No header terminator within the allowed header length.
    #[error("request header exceeds {max} bytes")]
    HeaderTooLong {
        /// Configured limit
        max: usize,
    },

    /// Header text is not UTF-8.
    #[error("message is not valid UTF-8")]
    NotUtf8,

    /// A server reply does not follow the response grammar.
    #[error("malformed {tag} response: {reason}")]
    MalformedResponse {
        /// Expected response tag
        tag: &'static str,
        /// What was wrong
        reason: String,
    },
}

impl ProtocolError {
    /// Verb whose tag prefixes the `ERR` reply, if any.
    ///
    /// Unknown verbs, verbs on the wrong transport and unreadable headers get
    /// the untagged `ERR` line.
    pub fn reply_verb(&self) -> Option<Verb> {
        match self {
            Self::ArgumentCount { verb, .. }
            | Self::InvalidField { verb, .. }
            | Self::PayloadTooLarge { verb, .. }
            | Self::Truncated { verb, .. } => Some(*verb),
            Self::UnknownVerb(_)
            | Self::WrongTransport { .. }
            | Self::HeaderTooLong { .. }
            | Self::NotUtf8
            | Self::MalformedResponse { .. } => None,
        }
    }

    pub(crate) fn field(verb: Verb, source: FieldError) -> Self {
        Self::InvalidField { verb, source }
    }

    pub(crate) fn malformed(tag: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedResponse { tag, reason: reason.into() }
    }
}
