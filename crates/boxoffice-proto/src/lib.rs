//! Boxoffice wire protocol.
//!
//! Requests are short text lines made of a 3-letter verb and a fixed,
//! verb-specific list of space separated fields. Control-plane verbs travel
//! as single datagrams; verbs carrying bulk data or multi-record replies use a
//! single-request stream connection. `CRE` is the only request with a binary
//! tail: its header declares a byte count, and exactly that many raw bytes
//! follow the header.
//!
//! This crate is sans-IO. [`codec::StreamDecoder`] accumulates stream bytes
//! until a full request (payload included) is available, and
//! [`codec::decode_datagram`] parses one datagram. Responses are encoded and
//! decoded by [`Response`].

#![forbid(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod fields;
mod request;
mod response;
mod state;

pub use codec::{DecoderLimits, StreamDecoder, decode_datagram};
pub use errors::{ProtocolError, Result};
pub use fields::{
    AccountId, Capacity, EventDate, EventId, EventName, FieldError, Filename, Password, SeatCount,
    Timestamp,
};
pub use request::{Request, Transport, Verb};
pub use response::{EventDetails, EventSummary, ReservationSummary, Response, Status};
pub use state::EventState;

/// Default port shared by the datagram and stream endpoints.
pub const DEFAULT_PORT: u16 = 58066;

/// Largest description payload accepted by default (10 MB).
pub const DEFAULT_MAX_DESCRIPTION_BYTES: u64 = 10_000_000;

/// Longest request header accepted before the decoder gives up.
///
/// The longest well-formed header is a `CRE` line, well under this bound.
pub const MAX_HEADER_BYTES: usize = 256;

/// Largest datagram the server reads or the client expects back.
pub const MAX_DATAGRAM_BYTES: usize = 8192;
