//! Reservation ledger.
//!
//! The reserved count stored with each event is the only source of seat
//! availability; reservation records are never summed to recompute it. A
//! reservation therefore writes three things, in this order:
//!
//! 1. the incremented reserved count,
//! 2. the event-side reservation record,
//! 3. the account-side reservation record.
//!
//! If step 2 or 3 fails, whatever was already written is undone (the
//! event-side record removed, then the count restored) and the error is
//! returned. The undo itself can fail; that is logged and the original error
//! still returned.
//!
//! The caller must hold the event lock for the whole call.

use boxoffice_core::Reservation;
use boxoffice_proto::{AccountId, EventId, EventState, SeatCount, Timestamp};
use chrono::NaiveDateTime;
use thiserror::Error;

use crate::{
    lifecycle::{self, LifecycleError},
    storage::{Storage, StorageError},
};

/// Result of a reservation attempt that reached a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Seats were reserved and both records written.
    Accepted(Reservation),
    /// Not enough seats left; nothing was written.
    Rejected {
        /// Seats still free
        available: u16,
    },
    /// The event does not take reservations in this state.
    NotActive(EventState),
}

/// Errors from the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Evaluating the event failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// A ledger write failed and was rolled back.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Reserves `seats` on `eid` for `uid`.
pub fn reserve<S: Storage>(
    storage: &S,
    eid: EventId,
    uid: &AccountId,
    seats: SeatCount,
    now: NaiveDateTime,
) -> Result<ReserveOutcome, LedgerError> {
    let evaluation = lifecycle::evaluate(storage, eid, now)?;
    if evaluation.state != EventState::Active {
        return Ok(ReserveOutcome::NotActive(evaluation.state));
    }

    // Active implies reserved < capacity.
    let reserved = evaluation.reserved;
    let available = evaluation.available();
    if seats.get() > available {
        return Ok(ReserveOutcome::Rejected { available });
    }

    let reservation = Reservation {
        eid,
        uid: uid.clone(),
        seats,
        reserved_at: Timestamp::from_datetime(now),
        first_seat: reserved,
    };

    storage.write_reserved_count(eid, reserved + seats.get())?;

    if let Err(err) = storage.append_event_reservation(&reservation) {
        restore_count(storage, eid, reserved);
        return Err(err.into());
    }

    if let Err(err) = storage.append_account_reservation(&reservation) {
        if let Err(undo) = storage.remove_event_reservation(&reservation) {
            tracing::error!(%eid, first_seat = reserved, "failed to remove event-side record: {undo}");
        }
        restore_count(storage, eid, reserved);
        return Err(err.into());
    }

    Ok(ReserveOutcome::Accepted(reservation))
}

fn restore_count<S: Storage>(storage: &S, eid: EventId, count: u16) {
    if let Err(undo) = storage.write_reserved_count(eid, count) {
        tracing::error!(%eid, count, "failed to restore reserved count: {undo}");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use boxoffice_core::{ClosureMarker, ClosureReason, EventMeta};
    use boxoffice_proto::{Capacity, EventDate, EventName, Filename};
    use chrono::{NaiveDate, TimeDelta};
    use proptest::prelude::*;

    use super::*;
    use crate::storage::{ChaoticStorage, MemoryStorage, StorageOp};

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2030, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    fn before() -> NaiveDateTime {
        start() - TimeDelta::days(1)
    }

    fn uid() -> AccountId {
        AccountId::parse("654321").unwrap()
    }

    fn seats(n: u16) -> SeatCount {
        SeatCount::new(n).unwrap()
    }

    fn create(storage: &impl Storage, capacity: u16) -> EventId {
        let meta = EventMeta {
            owner: AccountId::parse("123456").unwrap(),
            name: EventName::parse("Conf").unwrap(),
            filename: Filename::parse("desc.txt").unwrap(),
            capacity: Capacity::new(capacity).unwrap(),
            start: EventDate::from_datetime(start()),
        };
        storage.create_event(&meta, b"").unwrap()
    }

    #[test]
    fn accepted_writes_both_records() {
        let storage = MemoryStorage::new();
        let eid = create(&storage, 10);

        let outcome = reserve(&storage, eid, &uid(), seats(4), before()).unwrap();
        let ReserveOutcome::Accepted(reservation) = outcome else {
            unreachable!("expected acceptance, got {outcome:?}");
        };

        assert_eq!(reservation.first_seat, 0);
        assert_eq!(storage.read_reserved_count(eid).unwrap(), 4);
        assert_eq!(storage.event_reservations(eid).unwrap(), vec![reservation.clone()]);
        assert_eq!(storage.account_reservations(&uid()).unwrap(), vec![reservation]);
    }

    #[test]
    fn overflow_is_rejected_without_writes() {
        let storage = MemoryStorage::new();
        let eid = create(&storage, 10);
        reserve(&storage, eid, &uid(), seats(8), before()).unwrap();

        let outcome = reserve(&storage, eid, &uid(), seats(3), before()).unwrap();
        assert_eq!(outcome, ReserveOutcome::Rejected { available: 2 });
        assert_eq!(storage.read_reserved_count(eid).unwrap(), 8);
        assert_eq!(storage.event_reservations(eid).unwrap().len(), 1);
    }

    #[test]
    fn full_house_reports_sold_out() {
        let storage = MemoryStorage::new();
        let eid = create(&storage, 10);
        reserve(&storage, eid, &uid(), seats(10), before()).unwrap();

        let outcome = reserve(&storage, eid, &uid(), seats(1), before()).unwrap();
        assert_eq!(outcome, ReserveOutcome::NotActive(EventState::SoldOut));
    }

    #[test]
    fn past_and_closed_events_refuse() {
        let storage = MemoryStorage::new();
        let past = create(&storage, 10);
        let closed = create(&storage, 10);
        let marker = ClosureMarker {
            closed_at: Timestamp::from_datetime(before()),
            reason: ClosureReason::ClosedByOwner,
        };
        storage.mark_closed(closed, &marker).unwrap();

        let after = start() + TimeDelta::minutes(1);
        assert_eq!(
            reserve(&storage, past, &uid(), seats(1), after).unwrap(),
            ReserveOutcome::NotActive(EventState::Past)
        );
        assert_eq!(
            reserve(&storage, closed, &uid(), seats(1), before()).unwrap(),
            ReserveOutcome::NotActive(EventState::Closed)
        );
    }

    #[test]
    fn event_record_failure_restores_count() {
        let storage = ChaoticStorage::new(MemoryStorage::new(), 0.0);
        let eid = create(&storage, 10);
        storage.fail_always(StorageOp::AppendEventReservation);

        assert!(matches!(
            reserve(&storage, eid, &uid(), seats(3), before()),
            Err(LedgerError::Storage(_))
        ));
        assert_eq!(storage.inner().read_reserved_count(eid).unwrap(), 0);
        assert!(storage.inner().event_reservations(eid).unwrap().is_empty());
    }

    #[test]
    fn account_record_failure_removes_event_record() {
        let storage = ChaoticStorage::new(MemoryStorage::new(), 0.0);
        let eid = create(&storage, 10);
        storage.fail_always(StorageOp::AppendAccountReservation);

        assert!(reserve(&storage, eid, &uid(), seats(3), before()).is_err());
        assert_eq!(storage.inner().read_reserved_count(eid).unwrap(), 0);
        assert!(storage.inner().event_reservations(eid).unwrap().is_empty());
        assert!(storage.inner().account_reservations(&uid()).unwrap().is_empty());

        storage.heal(StorageOp::AppendAccountReservation);
        let outcome = reserve(&storage, eid, &uid(), seats(3), before()).unwrap();
        assert!(matches!(outcome, ReserveOutcome::Accepted(ref r) if r.first_seat == 0));
    }

    #[test]
    fn count_above_capacity_reads_sold_out() {
        let storage = MemoryStorage::new();
        let eid = create(&storage, 10);
        storage.write_reserved_count(eid, 11).unwrap();

        assert_eq!(
            reserve(&storage, eid, &uid(), seats(1), before()).unwrap(),
            ReserveOutcome::NotActive(EventState::SoldOut)
        );
    }

    proptest! {
        #[test]
        fn prop_count_matches_accepted_seats(
            capacity in 10u16..=60,
            requests in prop::collection::vec(1u16..=25, 1..40),
        ) {
            let storage = MemoryStorage::new();
            let eid = create(&storage, capacity);
            let mut accepted = 0u16;

            for n in requests {
                match reserve(&storage, eid, &uid(), seats(n), before()).unwrap() {
                    ReserveOutcome::Accepted(r) => {
                        prop_assert_eq!(r.first_seat, accepted);
                        accepted += n;
                    },
                    ReserveOutcome::Rejected { available } => {
                        prop_assert_eq!(available, capacity - accepted);
                        prop_assert!(n > available);
                    },
                    ReserveOutcome::NotActive(state) => {
                        prop_assert_eq!(state, EventState::SoldOut);
                        prop_assert_eq!(accepted, capacity);
                    },
                }

                // PROPERTY: the stored count is the running sum and never
                // exceeds capacity
                let stored = storage.read_reserved_count(eid).unwrap();
                prop_assert_eq!(stored, accepted);
                prop_assert!(stored <= capacity);
            }
        }
    }
}
