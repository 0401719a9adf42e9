//! Storage abstraction for boxoffice.
//!
//! One synchronous trait covers the credential store, the event store and the
//! reservation records. Every request re-reads what it needs; backends keep
//! no cache that could go stale.
//!
//! Backends:
//! - [`FsStorage`]: one directory per account and per event, plain text files
//! - [`RedbStorage`]: one table per entity in an embedded database
//! - [`MemoryStorage`]: maps behind a mutex, for tests
//! - [`ChaoticStorage`]: fault-injecting wrapper around any of the above

mod chaotic;
mod error;
mod fs;
mod memory;
mod redb;

use boxoffice_core::{ClosureMarker, EventMeta, Reservation};
use boxoffice_proto::{AccountId, EventId, Password};
pub use chaotic::{ChaoticStorage, StorageOp};
pub use error::StorageError;
pub use fs::FsStorage;
pub use memory::MemoryStorage;

pub use self::redb::RedbStorage;

/// Storage abstraction for accounts, events and reservations.
///
/// Must be Clone (shared by every connection task), Send + Sync, and
/// synchronous. Implementations share internal state, so clones access the
/// same underlying storage.
///
/// Mutual exclusion between requests is not the backend's concern: callers
/// hold the per-event or per-account lock. The one exception is event-id
/// allocation inside [`Storage::create_event`], which each backend
/// serializes itself.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Whether a password record exists for `uid`.
    ///
    /// An account whose credentials were removed does not exist, even if its
    /// history remains.
    fn account_exists(&self, uid: &AccountId) -> Result<bool, StorageError>;

    /// Whether `candidate` equals the stored password. False for unknown
    /// accounts.
    fn password_matches(&self, uid: &AccountId, candidate: &Password)
    -> Result<bool, StorageError>;

    /// Whether the account has an open session.
    fn has_session(&self, uid: &AccountId) -> Result<bool, StorageError>;

    /// Writes credentials for `uid` and opens a session.
    ///
    /// Replaces whatever credentials were there, so it also re-initializes an
    /// account left behind by [`Storage::delete_account`].
    fn create_account(&self, uid: &AccountId, password: &Password) -> Result<(), StorageError>;

    /// Opens a session. Idempotent.
    fn open_session(&self, uid: &AccountId) -> Result<(), StorageError>;

    /// Closes a session. Idempotent.
    fn close_session(&self, uid: &AccountId) -> Result<(), StorageError>;

    /// Replaces the stored password.
    fn change_password(&self, uid: &AccountId, password: &Password) -> Result<(), StorageError>;

    /// Removes the password and session records.
    ///
    /// Created events and reservations stay behind as history.
    fn delete_account(&self, uid: &AccountId) -> Result<(), StorageError>;

    /// Events created by `uid`, ascending.
    fn created_events(&self, uid: &AccountId) -> Result<Vec<EventId>, StorageError>;

    /// Reservations made by `uid`, in no particular order.
    fn account_reservations(&self, uid: &AccountId) -> Result<Vec<Reservation>, StorageError>;

    /// Id the next successful [`Storage::create_event`] will use.
    ///
    /// Fails with [`StorageError::Exhausted`] once the id space is used up.
    fn next_event_id(&self) -> Result<EventId, StorageError>;

    /// Creates an event and returns its id.
    ///
    /// # Invariants
    ///
    /// - Writes, in order: description, start metadata, a reserved count of
    ///   zero, the owner's created index, and last the advanced id counter
    /// - A failure before the counter write leaves an unlisted orphan that
    ///   the next creation overwrites
    fn create_event(&self, meta: &EventMeta, description: &[u8]) -> Result<EventId, StorageError>;

    /// Start metadata. `None` if the event does not exist.
    fn read_meta(&self, eid: EventId) -> Result<Option<EventMeta>, StorageError>;

    /// Description file contents. `None` if the event does not exist.
    fn read_description(&self, eid: EventId) -> Result<Option<Vec<u8>>, StorageError>;

    /// Running reserved-seat count.
    ///
    /// Fails with [`StorageError::Corrupt`] if the event has no count.
    fn read_reserved_count(&self, eid: EventId) -> Result<u16, StorageError>;

    /// Overwrites the reserved-seat count.
    fn write_reserved_count(&self, eid: EventId, count: u16) -> Result<(), StorageError>;

    /// Writes a closure marker unless one exists.
    ///
    /// Returns whether this call wrote it. An existing marker is never
    /// rewritten.
    fn mark_closed(&self, eid: EventId, marker: &ClosureMarker) -> Result<bool, StorageError>;

    /// Closure marker, if the event is closed.
    fn closure_marker(&self, eid: EventId) -> Result<Option<ClosureMarker>, StorageError>;

    /// Whether a closure marker exists.
    fn is_closed(&self, eid: EventId) -> Result<bool, StorageError> {
        Ok(self.closure_marker(eid)?.is_some())
    }

    /// Every listed event id, ascending.
    ///
    /// Only ids below the persisted counter are returned, so orphans of an
    /// interrupted creation never show up.
    fn list_event_ids(&self) -> Result<Vec<EventId>, StorageError>;

    /// Owner of the event. `None` if the event does not exist.
    fn owner_of(&self, eid: EventId) -> Result<Option<AccountId>, StorageError> {
        Ok(self.read_meta(eid)?.map(|meta| meta.owner))
    }

    /// Records a reservation under its event.
    fn append_event_reservation(&self, reservation: &Reservation) -> Result<(), StorageError>;

    /// Records a reservation under its account.
    fn append_account_reservation(&self, reservation: &Reservation) -> Result<(), StorageError>;

    /// Removes the event-side record. Missing records are ignored.
    fn remove_event_reservation(&self, reservation: &Reservation) -> Result<(), StorageError>;

    /// Reservations recorded under an event, ordered by first seat.
    fn event_reservations(&self, eid: EventId) -> Result<Vec<Reservation>, StorageError>;
}
