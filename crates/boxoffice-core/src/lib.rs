//! Boxoffice domain core.
//!
//! Holds what the server and its storage backends share: the wall-clock
//! [`Environment`], the persisted records, and the pure lifecycle rule that
//! turns stored facts into an [`EventState`](boxoffice_proto::EventState).
//! Nothing here performs I/O.

#![forbid(unsafe_code)]

pub mod env;
pub mod lifecycle;
pub mod model;

pub use env::{Environment, ManualEnv};
pub use lifecycle::{Lifecycle, derive_state};
pub use model::{ClosureMarker, ClosureReason, EventMeta, Reservation};
