#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use boxoffice_core::{ClosureMarker, EventMeta, Reservation};
use boxoffice_proto::{AccountId, EventId, Password};

use super::{Storage, StorageError};

/// In-memory storage implementation for testing and simulation.
///
/// All state sits in one map set behind an `Arc<Mutex<>>`, so clones share
/// it and every operation is atomic with respect to the others.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    passwords: HashMap<AccountId, Password>,
    sessions: HashSet<AccountId>,
    created: HashMap<AccountId, BTreeSet<EventId>>,
    account_reservations: HashMap<AccountId, Vec<Reservation>>,
    events: BTreeMap<EventId, StoredEvent>,
    /// Ids handed out so far; the next id is one above.
    allocated: u16,
}

struct StoredEvent {
    meta: EventMeta,
    description: Vec<u8>,
    reserved: u16,
    closure: Option<ClosureMarker>,
    reservations: BTreeMap<u16, Reservation>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events stored.
    pub fn event_count(&self) -> usize {
        self.lock().events.len()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStorageInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryStorageInner {
    fn next_id(&self) -> Result<EventId, StorageError> {
        EventId::new(self.allocated + 1).ok_or(StorageError::Exhausted)
    }

    fn event(&self, eid: EventId) -> Result<&StoredEvent, StorageError> {
        self.events.get(&eid).ok_or_else(|| StorageError::Corrupt(format!("event {eid} missing")))
    }

    fn event_mut(&mut self, eid: EventId) -> Result<&mut StoredEvent, StorageError> {
        self.events
            .get_mut(&eid)
            .ok_or_else(|| StorageError::Corrupt(format!("event {eid} missing")))
    }
}

impl Storage for MemoryStorage {
    fn account_exists(&self, uid: &AccountId) -> Result<bool, StorageError> {
        Ok(self.lock().passwords.contains_key(uid))
    }

    fn password_matches(
        &self,
        uid: &AccountId,
        candidate: &Password,
    ) -> Result<bool, StorageError> {
        Ok(self.lock().passwords.get(uid) == Some(candidate))
    }

    fn has_session(&self, uid: &AccountId) -> Result<bool, StorageError> {
        Ok(self.lock().sessions.contains(uid))
    }

    fn create_account(&self, uid: &AccountId, password: &Password) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.passwords.insert(uid.clone(), password.clone());
        inner.sessions.insert(uid.clone());
        Ok(())
    }

    fn open_session(&self, uid: &AccountId) -> Result<(), StorageError> {
        self.lock().sessions.insert(uid.clone());
        Ok(())
    }

    fn close_session(&self, uid: &AccountId) -> Result<(), StorageError> {
        self.lock().sessions.remove(uid);
        Ok(())
    }

    fn change_password(&self, uid: &AccountId, password: &Password) -> Result<(), StorageError> {
        self.lock().passwords.insert(uid.clone(), password.clone());
        Ok(())
    }

    fn delete_account(&self, uid: &AccountId) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.passwords.remove(uid);
        inner.sessions.remove(uid);
        Ok(())
    }

    fn created_events(&self, uid: &AccountId) -> Result<Vec<EventId>, StorageError> {
        let inner = self.lock();
        Ok(inner.created.get(uid).map(|ids| ids.iter().copied().collect()).unwrap_or_default())
    }

    fn account_reservations(&self, uid: &AccountId) -> Result<Vec<Reservation>, StorageError> {
        Ok(self.lock().account_reservations.get(uid).cloned().unwrap_or_default())
    }

    fn next_event_id(&self) -> Result<EventId, StorageError> {
        self.lock().next_id()
    }

    fn create_event(&self, meta: &EventMeta, description: &[u8]) -> Result<EventId, StorageError> {
        let mut inner = self.lock();
        let eid = inner.next_id()?;

        inner.events.insert(eid, StoredEvent {
            meta: meta.clone(),
            description: description.to_vec(),
            reserved: 0,
            closure: None,
            reservations: BTreeMap::new(),
        });
        inner.created.entry(meta.owner.clone()).or_default().insert(eid);
        inner.allocated = eid.get();

        Ok(eid)
    }

    fn read_meta(&self, eid: EventId) -> Result<Option<EventMeta>, StorageError> {
        Ok(self.lock().events.get(&eid).map(|event| event.meta.clone()))
    }

    fn read_description(&self, eid: EventId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.lock().events.get(&eid).map(|event| event.description.clone()))
    }

    fn read_reserved_count(&self, eid: EventId) -> Result<u16, StorageError> {
        Ok(self.lock().event(eid)?.reserved)
    }

    fn write_reserved_count(&self, eid: EventId, count: u16) -> Result<(), StorageError> {
        self.lock().event_mut(eid)?.reserved = count;
        Ok(())
    }

    fn mark_closed(&self, eid: EventId, marker: &ClosureMarker) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        let event = inner.event_mut(eid)?;
        if event.closure.is_some() {
            return Ok(false);
        }
        event.closure = Some(*marker);
        Ok(true)
    }

    fn closure_marker(&self, eid: EventId) -> Result<Option<ClosureMarker>, StorageError> {
        Ok(self.lock().events.get(&eid).and_then(|event| event.closure))
    }

    fn list_event_ids(&self) -> Result<Vec<EventId>, StorageError> {
        Ok(self.lock().events.keys().copied().collect())
    }

    fn append_event_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let event = inner.event_mut(reservation.eid)?;
        event.reservations.insert(reservation.first_seat, reservation.clone());
        Ok(())
    }

    fn append_account_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner
            .account_reservations
            .entry(reservation.uid.clone())
            .or_default()
            .push(reservation.clone());
        Ok(())
    }

    fn remove_event_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if let Some(event) = inner.events.get_mut(&reservation.eid)
            && event.reservations.get(&reservation.first_seat) == Some(reservation)
        {
            event.reservations.remove(&reservation.first_seat);
        }
        Ok(())
    }

    fn event_reservations(&self, eid: EventId) -> Result<Vec<Reservation>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .events
            .get(&eid)
            .map(|event| event.reservations.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use boxoffice_core::ClosureReason;
    use boxoffice_proto::{Capacity, EventDate, EventName, Filename, Timestamp};

    use super::*;

    fn uid() -> AccountId {
        AccountId::parse("123456").unwrap()
    }

    fn meta() -> EventMeta {
        EventMeta {
            owner: uid(),
            name: EventName::parse("Conf").unwrap(),
            filename: Filename::parse("desc.txt").unwrap(),
            capacity: Capacity::new(10).unwrap(),
            start: EventDate::parse("01-01-2099", "10:00").unwrap(),
        }
    }

    #[test]
    fn ids_are_sequential_from_one() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.next_event_id().unwrap(), EventId::FIRST);

        let first = storage.create_event(&meta(), b"a").unwrap();
        let second = storage.create_event(&meta(), b"b").unwrap();
        assert_eq!((first.get(), second.get()), (1, 2));
        assert_eq!(storage.created_events(&uid()).unwrap(), vec![first, second]);
        assert_eq!(storage.read_reserved_count(second).unwrap(), 0);
    }

    #[test]
    fn id_space_runs_out_after_999() {
        let storage = MemoryStorage::new();
        for _ in 0..999 {
            storage.create_event(&meta(), b"").unwrap();
        }
        assert_eq!(storage.next_event_id(), Err(StorageError::Exhausted));
        assert_eq!(storage.create_event(&meta(), b""), Err(StorageError::Exhausted));
    }

    #[test]
    fn delete_keeps_history() {
        let storage = MemoryStorage::new();
        let password = Password::parse("pass1234").unwrap();
        storage.create_account(&uid(), &password).unwrap();
        let eid = storage.create_event(&meta(), b"").unwrap();

        storage.delete_account(&uid()).unwrap();
        assert!(!storage.account_exists(&uid()).unwrap());
        assert!(!storage.has_session(&uid()).unwrap());
        assert_eq!(storage.created_events(&uid()).unwrap(), vec![eid]);
    }

    #[test]
    fn mark_closed_keeps_first_marker() {
        let storage = MemoryStorage::new();
        let eid = storage.create_event(&meta(), b"").unwrap();
        let first = ClosureMarker {
            closed_at: "01-01-2030 10:00:00".parse::<Timestamp>().unwrap(),
            reason: ClosureReason::ClosedByOwner,
        };
        let second = ClosureMarker {
            closed_at: "02-01-2030 10:00:00".parse::<Timestamp>().unwrap(),
            reason: ClosureReason::Expired,
        };

        assert!(storage.mark_closed(eid, &first).unwrap());
        assert!(!storage.mark_closed(eid, &second).unwrap());
        assert_eq!(storage.closure_marker(eid).unwrap(), Some(first));
    }
}
