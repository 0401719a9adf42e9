//! Chaotic storage wrapper for fault injection testing
//!
//! Storage wrapper that fails operations on purpose, either at random or on
//! demand, to test that the ledger and the dispatcher never leave partial
//! effects behind when a write goes wrong.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use boxoffice_core::{ClosureMarker, EventMeta, Reservation};
use boxoffice_proto::{AccountId, EventId, Password};

use super::{Storage, StorageError};

/// One [`Storage`] method, for targeting failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StorageOp {
    AccountExists,
    PasswordMatches,
    HasSession,
    CreateAccount,
    OpenSession,
    CloseSession,
    ChangePassword,
    DeleteAccount,
    CreatedEvents,
    AccountReservations,
    NextEventId,
    CreateEvent,
    ReadMeta,
    ReadDescription,
    ReadReservedCount,
    WriteReservedCount,
    MarkClosed,
    ClosureMarker,
    IsClosed,
    ListEventIds,
    AppendEventReservation,
    AppendAccountReservation,
    RemoveEventReservation,
    EventReservations,
}

impl StorageOp {
    /// Whether the operation changes stored state.
    pub const fn is_write(self) -> bool {
        matches!(
            self,
            Self::CreateAccount
                | Self::OpenSession
                | Self::CloseSession
                | Self::ChangePassword
                | Self::DeleteAccount
                | Self::CreateEvent
                | Self::WriteReservedCount
                | Self::MarkClosed
                | Self::AppendEventReservation
                | Self::AppendAccountReservation
                | Self::RemoveEventReservation
        )
    }
}

/// Chaotic storage wrapper that injects failures
///
/// Delegates to an underlying storage implementation but fails operations
/// based on a configured failure rate, optionally restricted to a set of
/// operations. Specific operations can also be made to fail every time with
/// [`ChaoticStorage::fail_always`]. Shared state sits behind `Arc<Mutex<>>`,
/// so clones inject into the same stream.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// Operations eligible for random failure; `None` means all
    scope: Option<Arc<HashSet<StorageOp>>>,
    /// Operations that fail on every call
    forced: Arc<Mutex<HashSet<StorageOp>>>,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Operation counter
    operation_count: Arc<Mutex<usize>>,
}

/// Simple deterministic RNG for chaos injection
///
/// Uses linear congruential generator (LCG) for fast, deterministic randomness.
/// This ensures chaos tests are reproducible with the same seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    #[allow(clippy::cast_precision_loss)]
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    /// Check if we should fail (returns true with probability = `failure_rate`)
    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            scope: None,
            forced: Arc::new(Mutex::new(HashSet::new())),
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Restrict random failures to `ops`.
    #[must_use]
    pub fn with_scope(mut self, ops: impl IntoIterator<Item = StorageOp>) -> Self {
        self.scope = Some(Arc::new(ops.into_iter().collect()));
        self
    }

    /// Make every call to `op` fail until [`ChaoticStorage::heal`].
    pub fn fail_always(&self, op: StorageOp) {
        self.forced.lock().unwrap_or_else(PoisonError::into_inner).insert(op);
    }

    /// Undo [`ChaoticStorage::fail_always`].
    pub fn heal(&self, op: StorageOp) {
        self.forced.lock().unwrap_or_else(PoisonError::into_inner).remove(&op);
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted.
    pub fn operation_count(&self) -> usize {
        *self.operation_count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and decide whether it fails.
    fn check(&self, op: StorageOp) -> Result<(), StorageError> {
        *self.operation_count.lock().unwrap_or_else(PoisonError::into_inner) += 1;

        if self.forced.lock().unwrap_or_else(PoisonError::into_inner).contains(&op) {
            return Err(StorageError::Io(format!("injected failure: {op:?}")));
        }

        let eligible = self.scope.as_ref().is_none_or(|scope| scope.contains(&op));
        if eligible
            && self.rng.lock().unwrap_or_else(PoisonError::into_inner).should_fail(self.failure_rate)
        {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn account_exists(&self, uid: &AccountId) -> Result<bool, StorageError> {
        self.check(StorageOp::AccountExists)?;
        self.inner.account_exists(uid)
    }

    fn password_matches(
        &self,
        uid: &AccountId,
        candidate: &Password,
    ) -> Result<bool, StorageError> {
        self.check(StorageOp::PasswordMatches)?;
        self.inner.password_matches(uid, candidate)
    }

    fn has_session(&self, uid: &AccountId) -> Result<bool, StorageError> {
        self.check(StorageOp::HasSession)?;
        self.inner.has_session(uid)
    }

    fn create_account(&self, uid: &AccountId, password: &Password) -> Result<(), StorageError> {
        self.check(StorageOp::CreateAccount)?;
        self.inner.create_account(uid, password)
    }

    fn open_session(&self, uid: &AccountId) -> Result<(), StorageError> {
        self.check(StorageOp::OpenSession)?;
        self.inner.open_session(uid)
    }

    fn close_session(&self, uid: &AccountId) -> Result<(), StorageError> {
        self.check(StorageOp::CloseSession)?;
        self.inner.close_session(uid)
    }

    fn change_password(&self, uid: &AccountId, password: &Password) -> Result<(), StorageError> {
        self.check(StorageOp::ChangePassword)?;
        self.inner.change_password(uid, password)
    }

    fn delete_account(&self, uid: &AccountId) -> Result<(), StorageError> {
        self.check(StorageOp::DeleteAccount)?;
        self.inner.delete_account(uid)
    }

    fn created_events(&self, uid: &AccountId) -> Result<Vec<EventId>, StorageError> {
        self.check(StorageOp::CreatedEvents)?;
        self.inner.created_events(uid)
    }

    fn account_reservations(&self, uid: &AccountId) -> Result<Vec<Reservation>, StorageError> {
        self.check(StorageOp::AccountReservations)?;
        self.inner.account_reservations(uid)
    }

    fn next_event_id(&self) -> Result<EventId, StorageError> {
        self.check(StorageOp::NextEventId)?;
        self.inner.next_event_id()
    }

    fn create_event(&self, meta: &EventMeta, description: &[u8]) -> Result<EventId, StorageError> {
        self.check(StorageOp::CreateEvent)?;
        self.inner.create_event(meta, description)
    }

    fn read_meta(&self, eid: EventId) -> Result<Option<EventMeta>, StorageError> {
        self.check(StorageOp::ReadMeta)?;
        self.inner.read_meta(eid)
    }

    fn read_description(&self, eid: EventId) -> Result<Option<Vec<u8>>, StorageError> {
        self.check(StorageOp::ReadDescription)?;
        self.inner.read_description(eid)
    }

    fn read_reserved_count(&self, eid: EventId) -> Result<u16, StorageError> {
        self.check(StorageOp::ReadReservedCount)?;
        self.inner.read_reserved_count(eid)
    }

    fn write_reserved_count(&self, eid: EventId, count: u16) -> Result<(), StorageError> {
        self.check(StorageOp::WriteReservedCount)?;
        self.inner.write_reserved_count(eid, count)
    }

    fn mark_closed(&self, eid: EventId, marker: &ClosureMarker) -> Result<bool, StorageError> {
        self.check(StorageOp::MarkClosed)?;
        self.inner.mark_closed(eid, marker)
    }

    fn closure_marker(&self, eid: EventId) -> Result<Option<ClosureMarker>, StorageError> {
        self.check(StorageOp::ClosureMarker)?;
        self.inner.closure_marker(eid)
    }

    fn is_closed(&self, eid: EventId) -> Result<bool, StorageError> {
        self.check(StorageOp::IsClosed)?;
        self.inner.is_closed(eid)
    }

    fn list_event_ids(&self) -> Result<Vec<EventId>, StorageError> {
        self.check(StorageOp::ListEventIds)?;
        self.inner.list_event_ids()
    }

    fn append_event_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        self.check(StorageOp::AppendEventReservation)?;
        self.inner.append_event_reservation(reservation)
    }

    fn append_account_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        self.check(StorageOp::AppendAccountReservation)?;
        self.inner.append_account_reservation(reservation)
    }

    fn remove_event_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        self.check(StorageOp::RemoveEventReservation)?;
        self.inner.remove_event_reservation(reservation)
    }

    fn event_reservations(&self, eid: EventId) -> Result<Vec<Reservation>, StorageError> {
        self.check(StorageOp::EventReservations)?;
        self.inner.event_reservations(eid)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use boxoffice_proto::{Capacity, EventDate, EventName, Filename};

    use super::*;
    use crate::storage::MemoryStorage;

    fn meta() -> EventMeta {
        EventMeta {
            owner: AccountId::parse("123456").unwrap(),
            name: EventName::parse("Conf").unwrap(),
            filename: Filename::parse("desc.txt").unwrap(),
            capacity: Capacity::new(10).unwrap(),
            start: EventDate::parse("01-01-2099", "10:00").unwrap(),
        }
    }

    #[test]
    fn test_chaotic_with_zero_failure_rate() {
        let chaotic = ChaoticStorage::new(MemoryStorage::new(), 0.0);

        for _ in 0..100 {
            chaotic.create_event(&meta(), b"").unwrap();
        }

        assert_eq!(chaotic.list_event_ids().unwrap().len(), 100);
        assert_eq!(chaotic.operation_count(), 101);
    }

    #[test]
    fn test_chaotic_with_100_failure_rate() {
        let chaotic = ChaoticStorage::new(MemoryStorage::new(), 1.0);

        assert!(chaotic.create_event(&meta(), b"").is_err());
        assert!(chaotic.list_event_ids().is_err());
        assert!(chaotic.next_event_id().is_err());
        assert_eq!(chaotic.inner().event_count(), 0);
    }

    #[test]
    fn test_chaotic_deterministic_with_seed() {
        let chaotic1 = ChaoticStorage::with_seed(MemoryStorage::new(), 0.5, 42);
        let chaotic2 = ChaoticStorage::with_seed(MemoryStorage::new(), 0.5, 42);

        for i in 0..100 {
            let result1 = chaotic1.create_event(&meta(), b"");
            let result2 = chaotic2.create_event(&meta(), b"");

            assert_eq!(result1.is_ok(), result2.is_ok(), "determinism violated at iteration {i}");
        }
    }

    #[test]
    fn test_scope_limits_random_failures() {
        let chaotic = ChaoticStorage::new(MemoryStorage::new(), 1.0)
            .with_scope([StorageOp::AppendAccountReservation]);

        let eid = chaotic.create_event(&meta(), b"").unwrap();
        assert_eq!(chaotic.read_reserved_count(eid).unwrap(), 0);
        assert!(StorageOp::AppendAccountReservation.is_write());
        assert!(!StorageOp::ReadMeta.is_write());
    }

    #[test]
    fn test_fail_always_until_healed() {
        let chaotic = ChaoticStorage::new(MemoryStorage::new(), 0.0);
        let eid = chaotic.create_event(&meta(), b"").unwrap();

        chaotic.fail_always(StorageOp::WriteReservedCount);
        assert!(chaotic.write_reserved_count(eid, 3).is_err());
        assert_eq!(chaotic.read_reserved_count(eid).unwrap(), 0);

        chaotic.heal(StorageOp::WriteReservedCount);
        chaotic.write_reserved_count(eid, 3).unwrap();
        assert_eq!(chaotic.inner().read_reserved_count(eid).unwrap(), 3);
    }

    #[test]
    #[should_panic(expected = "failure_rate must be between 0.0 and 1.0")]
    fn test_chaotic_rejects_invalid_failure_rate() {
        let _chaotic = ChaoticStorage::new(MemoryStorage::new(), 1.5);
    }
}
