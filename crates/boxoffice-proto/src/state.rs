//! Event lifecycle states and their single-digit wire codes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an event as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventState {
    /// Start time has passed
    Past,
    /// Open for reservations
    Active,
    /// Every seat is reserved
    SoldOut,
    /// Closed by its owner or by expiry
    Closed,
}

impl EventState {
    /// Single-digit wire code.
    pub const fn code(self) -> u8 {
        match self {
            Self::Past => 0,
            Self::Active => 1,
            Self::SoldOut => 2,
            Self::Closed => 3,
        }
    }

    /// Inverse of [`EventState::code`].
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Past),
            1 => Some(Self::Active),
            2 => Some(Self::SoldOut),
            3 => Some(Self::Closed),
            _ => None,
        }
    }

    /// Parses a wire code token. Only a single digit is accepted, so forms
    /// like `+1` or `01` that `u8` parsing allows are refused.
    pub(crate) fn parse(token: &str) -> Option<Self> {
        if token.len() != 1 {
            return None;
        }
        token.parse::<u8>().ok().and_then(Self::from_code)
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Past => "PAST",
            Self::Active => "ACTIVE",
            Self::SoldOut => "SOLD_OUT",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
