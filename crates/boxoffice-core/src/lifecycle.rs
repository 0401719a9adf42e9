//! Event lifecycle rule.
//!
//! The state of an event is never stored. It is a pure function of the
//! closure marker, the start metadata, the reserved count and the current
//! time, evaluated in a fixed order:
//!
//! 1. a closure marker means CLOSED;
//! 2. a start time at or before now means PAST, and the caller must persist
//!    an expiry marker;
//! 3. a full house means SOLD_OUT;
//! 4. otherwise ACTIVE.
//!
//! Persisting the marker for case 2 is the caller's job, which keeps the
//! side effect visible at the call site.

use boxoffice_proto::EventState;
use chrono::NaiveDateTime;

use crate::EventMeta;

/// Outcome of [`derive_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// A closure marker exists
    Closed,
    /// Start time has passed and no marker exists yet
    Expired,
    /// Every seat is reserved
    SoldOut,
    /// Open for reservations
    Active,
}

impl Lifecycle {
    /// State reported to clients.
    pub const fn state(self) -> EventState {
        match self {
            Self::Closed => EventState::Closed,
            Self::Expired => EventState::Past,
            Self::SoldOut => EventState::SoldOut,
            Self::Active => EventState::Active,
        }
    }

    /// Whether an expiry marker must be persisted.
    pub const fn needs_closure(self) -> bool {
        matches!(self, Self::Expired)
    }
}

/// Derives the lifecycle of an event from stored facts.
pub fn derive_state(
    closed: bool,
    meta: &EventMeta,
    reserved: u16,
    now: NaiveDateTime,
) -> Lifecycle {
    if closed {
        Lifecycle::Closed
    } else if meta.start.as_datetime() <= now {
        Lifecycle::Expired
    } else if reserved >= meta.capacity.get() {
        Lifecycle::SoldOut
    } else {
        Lifecycle::Active
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use boxoffice_proto::{AccountId, Capacity, EventDate, EventName, Filename};
    use chrono::{NaiveDate, TimeDelta};
    use proptest::prelude::*;

    use super::*;

    fn meta(capacity: u16, start: NaiveDateTime) -> EventMeta {
        EventMeta {
            owner: AccountId::parse("123456").unwrap(),
            name: EventName::parse("Conf").unwrap(),
            filename: Filename::parse("desc.txt").unwrap(),
            capacity: Capacity::new(capacity).unwrap(),
            start: EventDate::from_datetime(start),
        }
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2030, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    #[test]
    fn start_time_counts_as_elapsed() {
        let event = meta(10, noon());
        assert_eq!(derive_state(false, &event, 0, noon()), Lifecycle::Expired);
        assert_eq!(
            derive_state(false, &event, 0, noon() - TimeDelta::seconds(1)),
            Lifecycle::Active
        );
    }

    #[test]
    fn expiry_beats_sold_out() {
        let event = meta(10, noon());
        let later = noon() + TimeDelta::days(1);
        assert_eq!(derive_state(false, &event, 10, later), Lifecycle::Expired);
        assert!(derive_state(false, &event, 10, later).needs_closure());
    }

    #[test]
    fn full_house_is_sold_out() {
        let event = meta(10, noon());
        let earlier = noon() - TimeDelta::days(1);
        assert_eq!(derive_state(false, &event, 10, earlier), Lifecycle::SoldOut);
        assert_eq!(derive_state(false, &event, 9, earlier).state(), EventState::Active);
    }

    proptest! {
        #[test]
        fn prop_closed_is_terminal(
            capacity in 10u16..=999,
            reserved in 0u16..=999,
            offset_minutes in -100_000i64..100_000,
        ) {
            let event = meta(capacity, noon());
            let now = noon() + TimeDelta::minutes(offset_minutes);
            let derived = derive_state(true, &event, reserved, now);

            // PROPERTY: a marker always wins, whatever else is stored
            prop_assert_eq!(derived, Lifecycle::Closed);
            prop_assert!(!derived.needs_closure());
        }

        #[test]
        fn prop_only_expiry_needs_a_marker(
            capacity in 10u16..=999,
            reserved in 0u16..=999,
            offset_minutes in -100_000i64..100_000,
        ) {
            let event = meta(capacity, noon());
            let now = noon() + TimeDelta::minutes(offset_minutes);
            let derived = derive_state(false, &event, reserved, now);

            prop_assert_eq!(derived.needs_closure(), offset_minutes >= 0);
            prop_assert_eq!(derived.state() == EventState::Past, offset_minutes >= 0);
        }
    }
}
