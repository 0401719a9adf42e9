//! Event lifecycle evaluator.
//!
//! Wraps the pure [`derive_state`] rule with the storage reads it needs and
//! the one write it may cause: an event found past its start time gets an
//! expiry marker the first time anything looks at it. Nothing expires events
//! in the background.
//!
//! Callers must hold the event's lock (see [`crate::locks::EventLocks`]) for
//! the whole evaluate-then-act sequence.

use boxoffice_core::{ClosureMarker, ClosureReason, EventMeta, derive_state};
use boxoffice_proto::{EventId, EventState, Timestamp};
use chrono::NaiveDateTime;
use thiserror::Error;

use crate::storage::{Storage, StorageError};

/// Errors from lifecycle evaluation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The event is referenced but its start metadata is gone.
    #[error("event {0} has no start metadata")]
    MissingMetadata(EventId),

    /// A storage read or the expiry write failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Everything read while evaluating an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Start metadata
    pub meta: EventMeta,
    /// Persisted reserved-seat count
    pub reserved: u16,
    /// Current state
    pub state: EventState,
}

impl Evaluation {
    /// Seats still free. Zero if the count somehow exceeds capacity.
    pub fn available(&self) -> u16 {
        self.meta.capacity.get().saturating_sub(self.reserved)
    }
}

/// Evaluates the current state of `eid`, persisting an expiry marker if the
/// start time has elapsed.
pub fn evaluate<S: Storage>(
    storage: &S,
    eid: EventId,
    now: NaiveDateTime,
) -> Result<Evaluation, LifecycleError> {
    let closed = storage.is_closed(eid)?;
    let meta = storage.read_meta(eid)?.ok_or(LifecycleError::MissingMetadata(eid))?;
    let reserved = storage.read_reserved_count(eid)?;

    let derived = derive_state(closed, &meta, reserved, now);
    if derived.needs_closure() {
        materialize(storage, eid, now)?;
    }

    Ok(Evaluation { meta, reserved, state: derived.state() })
}

/// Current state of `eid`. See [`evaluate`].
pub fn state<S: Storage>(
    storage: &S,
    eid: EventId,
    now: NaiveDateTime,
) -> Result<EventState, LifecycleError> {
    Ok(evaluate(storage, eid, now)?.state)
}

/// Persists the expiry marker for an event found past its start.
///
/// Returns whether this call wrote the marker. A concurrent close that got
/// there first wins and is left untouched.
pub fn materialize<S: Storage>(
    storage: &S,
    eid: EventId,
    now: NaiveDateTime,
) -> Result<bool, StorageError> {
    let marker =
        ClosureMarker { closed_at: Timestamp::from_datetime(now), reason: ClosureReason::Expired };
    storage.mark_closed(eid, &marker)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use boxoffice_proto::{AccountId, Capacity, EventDate, EventName, Filename};
    use chrono::{NaiveDate, TimeDelta};

    use super::*;
    use crate::storage::{ChaoticStorage, MemoryStorage, StorageOp};

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2030, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    fn create(storage: &impl Storage) -> EventId {
        let meta = EventMeta {
            owner: AccountId::parse("123456").unwrap(),
            name: EventName::parse("Conf").unwrap(),
            filename: Filename::parse("desc.txt").unwrap(),
            capacity: Capacity::new(10).unwrap(),
            start: EventDate::from_datetime(noon()),
        };
        storage.create_event(&meta, b"").unwrap()
    }

    #[test]
    fn expiry_is_materialized_on_first_look() {
        let storage = MemoryStorage::new();
        let eid = create(&storage);
        let later = noon() + TimeDelta::minutes(5);

        assert_eq!(state(&storage, eid, noon() - TimeDelta::minutes(1)).unwrap(), EventState::Active);
        assert!(!storage.is_closed(eid).unwrap());

        assert_eq!(state(&storage, eid, later).unwrap(), EventState::Past);
        let marker = storage.closure_marker(eid).unwrap().unwrap();
        assert_eq!(marker.reason, ClosureReason::Expired);
        assert_eq!(marker.closed_at, Timestamp::from_datetime(later));

        // Once marked, the event reads as closed from then on.
        assert_eq!(state(&storage, eid, later).unwrap(), EventState::Closed);
    }

    #[test]
    fn closed_stays_closed_even_before_start() {
        let storage = MemoryStorage::new();
        let eid = create(&storage);
        let marker = ClosureMarker {
            closed_at: Timestamp::from_datetime(noon() - TimeDelta::days(1)),
            reason: ClosureReason::ClosedByOwner,
        };
        storage.mark_closed(eid, &marker).unwrap();

        for offset in [-2, 0, 2] {
            let now = noon() + TimeDelta::days(offset);
            assert_eq!(state(&storage, eid, now).unwrap(), EventState::Closed);
        }
        assert_eq!(storage.closure_marker(eid).unwrap(), Some(marker));
    }

    #[test]
    fn sold_out_and_availability() {
        let storage = MemoryStorage::new();
        let eid = create(&storage);
        let before = noon() - TimeDelta::hours(1);

        storage.write_reserved_count(eid, 7).unwrap();
        let evaluation = evaluate(&storage, eid, before).unwrap();
        assert_eq!(evaluation.state, EventState::Active);
        assert_eq!(evaluation.available(), 3);

        storage.write_reserved_count(eid, 10).unwrap();
        assert_eq!(state(&storage, eid, before).unwrap(), EventState::SoldOut);
    }

    #[test]
    fn missing_metadata_is_an_error() {
        let storage = MemoryStorage::new();
        let eid = EventId::new(42).unwrap();
        assert_eq!(evaluate(&storage, eid, noon()), Err(LifecycleError::MissingMetadata(eid)));
    }

    #[test]
    fn failed_expiry_write_surfaces() {
        let storage = ChaoticStorage::new(MemoryStorage::new(), 0.0);
        let eid = create(&storage);
        storage.fail_always(StorageOp::MarkClosed);

        let result = state(&storage, eid, noon() + TimeDelta::hours(1));
        assert!(matches!(result, Err(LifecycleError::Storage(StorageError::Io(_)))));
        assert!(!storage.inner().is_closed(eid).unwrap());
    }
}
