//! Persisted records.

use std::fmt;

use boxoffice_proto::{
    AccountId, Capacity, EventDate, EventId, EventName, Filename, ReservationSummary, SeatCount,
    Timestamp,
};
use serde::{Deserialize, Serialize};

/// Start metadata of an event. Written once at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Account that created the event
    pub owner: AccountId,
    /// Display name
    pub name: EventName,
    /// Name of the description file
    pub filename: Filename,
    /// Total seats
    pub capacity: Capacity,
    /// Start date-time
    pub start: EventDate,
}

/// One accepted reservation.
///
/// Stored twice: under the event and under the account that made it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Event reserved
    pub eid: EventId,
    /// Reserving account
    pub uid: AccountId,
    /// Seats reserved
    pub seats: SeatCount,
    /// When the reservation was accepted
    pub reserved_at: Timestamp,
    /// Reserved count of the event just before this reservation.
    ///
    /// Unique among the committed reservations of one event.
    pub first_seat: u16,
}

impl Reservation {
    /// Wire form used by the `RMR` reply.
    pub fn summary(&self) -> ReservationSummary {
        ReservationSummary { eid: self.eid, reserved_at: self.reserved_at, seats: self.seats }
    }
}

/// Why an event was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClosureReason {
    /// Start time passed and the evaluator closed it
    Expired,
    /// The owner closed it
    ClosedByOwner,
}

impl ClosureReason {
    /// Text form used by file-backed storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::ClosedByOwner => "closed",
        }
    }

    /// Inverse of [`ClosureReason::as_str`].
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "expired" => Some(Self::Expired),
            "closed" => Some(Self::ClosedByOwner),
            _ => None,
        }
    }
}

impl fmt::Display for ClosureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker whose presence means the event is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureMarker {
    /// When the marker was written
    pub closed_at: Timestamp,
    /// Audit reason, never consulted for the state
    pub reason: ClosureReason,
}
