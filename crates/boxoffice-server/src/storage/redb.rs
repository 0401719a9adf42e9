//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. Event
//! creation runs in a single write transaction, so unlike the filesystem
//! backend an interrupted creation leaves nothing behind.

use std::{fmt, path::Path, sync::Arc};

use boxoffice_core::{ClosureMarker, EventMeta, Reservation};
use boxoffice_proto::{AccountId, EventId, Password};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use super::{Storage, StorageError};

type RawTable = TableDefinition<'static, &'static [u8], &'static [u8]>;

/// Table: accounts
/// Key: uid ASCII [6 bytes]
/// Value: password ASCII
const ACCOUNTS: RawTable = TableDefinition::new("accounts");

/// Table: sessions
/// Key: uid ASCII [6 bytes]
/// Value: empty
const SESSIONS: RawTable = TableDefinition::new("sessions");

/// Table: created
/// Key: (uid, eid) [8 bytes]
/// Value: empty
const CREATED: RawTable = TableDefinition::new("created");

/// Table: account_reservations
/// Key: (uid, eid, first_seat) [10 bytes]
/// Value: CBOR-encoded Reservation
const ACCOUNT_RESERVATIONS: RawTable = TableDefinition::new("account_reservations");

/// Table: events
/// Key: eid as big-endian bytes [2 bytes]
/// Value: CBOR-encoded EventMeta
const EVENTS: RawTable = TableDefinition::new("events");

/// Table: descriptions
/// Key: eid [2 bytes]
/// Value: raw description file
const DESCRIPTIONS: RawTable = TableDefinition::new("descriptions");

/// Table: reserved
/// Key: eid [2 bytes]
/// Value: reserved count (2 bytes BE)
const RESERVED: RawTable = TableDefinition::new("reserved");

/// Table: closures
/// Key: eid [2 bytes]
/// Value: CBOR-encoded ClosureMarker
const CLOSURES: RawTable = TableDefinition::new("closures");

/// Table: event_reservations
/// Key: (eid, first_seat) [4 bytes]
/// Value: CBOR-encoded Reservation
const EVENT_RESERVATIONS: RawTable = TableDefinition::new("event_reservations");

/// Table: counters
/// Key: counter name
/// Value: next event id (2 bytes BE)
const COUNTERS: RawTable = TableDefinition::new("counters");

const NEXT_EVENT_ID: &[u8] = b"next_event_id";

const ALL_TABLES: [RawTable; 10] = [
    ACCOUNTS,
    SESSIONS,
    CREATED,
    ACCOUNT_RESERVATIONS,
    EVENTS,
    DESCRIPTIONS,
    RESERVED,
    CLOSURES,
    EVENT_RESERVATIONS,
    COUNTERS,
];

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates every table if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        for table in ALL_TABLES {
            let _ = txn.open_table(table).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn get(&self, def: RawTable, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(def).map_err(io)?;
        let value = table.get(key).map_err(io)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn contains(&self, def: RawTable, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(def, key)?.is_some())
    }

    fn put(&self, def: RawTable, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(def).map_err(io)?;
            table.insert(key, value).map_err(io)?;
        }
        txn.commit().map_err(io)
    }

    fn remove(&self, def: RawTable, key: &[u8]) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(def).map_err(io)?;
            table.remove(key).map_err(io)?;
        }
        txn.commit().map_err(io)
    }

    /// Every entry with a key in `start..=end`, in key order.
    fn scan(
        &self,
        def: RawTable,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(def).map_err(io)?;

        let mut entries = Vec::new();
        for result in table.range(start..=end).map_err(io)? {
            let (key, value) = result.map_err(io)?;
            entries.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(entries)
    }

    fn read_counter<T: ReadableTable<&'static [u8], &'static [u8]>>(
        table: &T,
    ) -> Result<u16, StorageError> {
        match table.get(NEXT_EVENT_ID).map_err(io)? {
            Some(value) => decode_u16(value.value(), "event counter"),
            None => Ok(EventId::FIRST.get()),
        }
    }
}

fn io(err: impl fmt::Display) -> StorageError {
    StorageError::Io(err.to_string())
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode_u16(bytes: &[u8], what: &str) -> Result<u16, StorageError> {
    <[u8; 2]>::try_from(bytes)
        .map(u16::from_be_bytes)
        .map_err(|_| StorageError::Corrupt(format!("{what}: expected 2 bytes, got {}", bytes.len())))
}

/// Encode eid as 2-byte big-endian key.
fn encode_event_key(eid: EventId) -> [u8; 2] {
    eid.get().to_be_bytes()
}

fn decode_event_key(bytes: &[u8]) -> Result<EventId, StorageError> {
    let raw = decode_u16(bytes, "event key")?;
    EventId::new(raw).ok_or_else(|| StorageError::Corrupt(format!("event key out of range: {raw}")))
}

/// Encode (uid, eid) as 8-byte key.
///
/// Layout: [uid: 6 bytes ASCII][eid: 2 bytes BE]
fn encode_created_key(uid: &AccountId, eid: u16) -> [u8; 8] {
    let mut key = [0u8; 8];
    key[..6].copy_from_slice(uid.as_str().as_bytes());
    key[6..].copy_from_slice(&eid.to_be_bytes());
    key
}

/// Encode (uid, eid, first_seat) as 10-byte key.
///
/// Layout: [uid: 6 bytes ASCII][eid: 2 bytes BE][first_seat: 2 bytes BE]
fn encode_account_reservation_key(uid: &AccountId, eid: u16, first_seat: u16) -> [u8; 10] {
    let mut key = [0u8; 10];
    key[..8].copy_from_slice(&encode_created_key(uid, eid));
    key[8..].copy_from_slice(&first_seat.to_be_bytes());
    key
}

/// Encode (eid, first_seat) as 4-byte key.
///
/// Layout: [eid: 2 bytes BE][first_seat: 2 bytes BE]
fn encode_event_reservation_key(eid: EventId, first_seat: u16) -> [u8; 4] {
    let mut key = [0u8; 4];
    key[..2].copy_from_slice(&encode_event_key(eid));
    key[2..].copy_from_slice(&first_seat.to_be_bytes());
    key
}

impl Storage for RedbStorage {
    fn account_exists(&self, uid: &AccountId) -> Result<bool, StorageError> {
        self.contains(ACCOUNTS, uid.as_str().as_bytes())
    }

    fn password_matches(
        &self,
        uid: &AccountId,
        candidate: &Password,
    ) -> Result<bool, StorageError> {
        let stored = self.get(ACCOUNTS, uid.as_str().as_bytes())?;
        Ok(stored.is_some_and(|bytes| bytes == candidate.as_str().as_bytes()))
    }

    fn has_session(&self, uid: &AccountId) -> Result<bool, StorageError> {
        self.contains(SESSIONS, uid.as_str().as_bytes())
    }

    fn create_account(&self, uid: &AccountId, password: &Password) -> Result<(), StorageError> {
        let key = uid.as_str().as_bytes();
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut accounts = txn.open_table(ACCOUNTS).map_err(io)?;
            accounts.insert(key, password.as_str().as_bytes()).map_err(io)?;
            let mut sessions = txn.open_table(SESSIONS).map_err(io)?;
            sessions.insert(key, b"".as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)
    }

    fn open_session(&self, uid: &AccountId) -> Result<(), StorageError> {
        self.put(SESSIONS, uid.as_str().as_bytes(), &[])
    }

    fn close_session(&self, uid: &AccountId) -> Result<(), StorageError> {
        self.remove(SESSIONS, uid.as_str().as_bytes())
    }

    fn change_password(&self, uid: &AccountId, password: &Password) -> Result<(), StorageError> {
        self.put(ACCOUNTS, uid.as_str().as_bytes(), password.as_str().as_bytes())
    }

    fn delete_account(&self, uid: &AccountId) -> Result<(), StorageError> {
        let key = uid.as_str().as_bytes();
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut sessions = txn.open_table(SESSIONS).map_err(io)?;
            sessions.remove(key).map_err(io)?;
            let mut accounts = txn.open_table(ACCOUNTS).map_err(io)?;
            accounts.remove(key).map_err(io)?;
        }
        txn.commit().map_err(io)
    }

    fn created_events(&self, uid: &AccountId) -> Result<Vec<EventId>, StorageError> {
        let start = encode_created_key(uid, 0);
        let end = encode_created_key(uid, u16::MAX);
        self.scan(CREATED, &start, &end)?
            .iter()
            .map(|(key, _)| decode_event_key(&key[6..]))
            .collect()
    }

    fn account_reservations(&self, uid: &AccountId) -> Result<Vec<Reservation>, StorageError> {
        let start = encode_account_reservation_key(uid, 0, 0);
        let end = encode_account_reservation_key(uid, u16::MAX, u16::MAX);
        self.scan(ACCOUNT_RESERVATIONS, &start, &end)?
            .iter()
            .map(|(_, value)| from_cbor(value))
            .collect()
    }

    fn next_event_id(&self) -> Result<EventId, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let counters = txn.open_table(COUNTERS).map_err(io)?;
        EventId::new(Self::read_counter(&counters)?).ok_or(StorageError::Exhausted)
    }

    fn create_event(&self, meta: &EventMeta, description: &[u8]) -> Result<EventId, StorageError> {
        let meta_bytes = to_cbor(meta)?;

        let txn = self.db.begin_write().map_err(io)?;
        let eid = {
            let mut counters = txn.open_table(COUNTERS).map_err(io)?;
            let next = Self::read_counter(&counters)?;
            let eid = EventId::new(next).ok_or(StorageError::Exhausted)?;
            let key = encode_event_key(eid);

            let mut descriptions = txn.open_table(DESCRIPTIONS).map_err(io)?;
            descriptions.insert(key.as_slice(), description).map_err(io)?;

            let mut events = txn.open_table(EVENTS).map_err(io)?;
            events.insert(key.as_slice(), meta_bytes.as_slice()).map_err(io)?;

            let mut reserved = txn.open_table(RESERVED).map_err(io)?;
            reserved.insert(key.as_slice(), 0u16.to_be_bytes().as_slice()).map_err(io)?;

            let mut created = txn.open_table(CREATED).map_err(io)?;
            let created_key = encode_created_key(&meta.owner, eid.get());
            created.insert(created_key.as_slice(), b"".as_slice()).map_err(io)?;

            let advanced = (next + 1).to_be_bytes();
            counters.insert(NEXT_EVENT_ID, advanced.as_slice()).map_err(io)?;
            eid
        };
        txn.commit().map_err(io)?;

        Ok(eid)
    }

    fn read_meta(&self, eid: EventId) -> Result<Option<EventMeta>, StorageError> {
        self.get(EVENTS, &encode_event_key(eid))?.map(|bytes| from_cbor(&bytes)).transpose()
    }

    fn read_description(&self, eid: EventId) -> Result<Option<Vec<u8>>, StorageError> {
        self.get(DESCRIPTIONS, &encode_event_key(eid))
    }

    fn read_reserved_count(&self, eid: EventId) -> Result<u16, StorageError> {
        match self.get(RESERVED, &encode_event_key(eid))? {
            Some(bytes) => decode_u16(&bytes, "reserved count"),
            None => Err(StorageError::Corrupt(format!("event {eid} has no reserved count"))),
        }
    }

    fn write_reserved_count(&self, eid: EventId, count: u16) -> Result<(), StorageError> {
        self.put(RESERVED, &encode_event_key(eid), &count.to_be_bytes())
    }

    fn mark_closed(&self, eid: EventId, marker: &ClosureMarker) -> Result<bool, StorageError> {
        let bytes = to_cbor(marker)?;
        let key = encode_event_key(eid);

        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(CLOSURES).map_err(io)?;

            if table.get(key.as_slice()).map_err(io)?.is_some() {
                return Ok(false); // Already closed, keep the first marker
            }

            table.insert(key.as_slice(), bytes.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(true)
    }

    fn closure_marker(&self, eid: EventId) -> Result<Option<ClosureMarker>, StorageError> {
        self.get(CLOSURES, &encode_event_key(eid))?.map(|bytes| from_cbor(&bytes)).transpose()
    }

    fn list_event_ids(&self) -> Result<Vec<EventId>, StorageError> {
        let start = encode_event_key(EventId::FIRST);
        let end = encode_event_key(EventId::LAST);
        self.scan(EVENTS, &start, &end)?.iter().map(|(key, _)| decode_event_key(key)).collect()
    }

    fn append_event_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        let key = encode_event_reservation_key(reservation.eid, reservation.first_seat);
        self.put(EVENT_RESERVATIONS, &key, &to_cbor(reservation)?)
    }

    fn append_account_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        let key = encode_account_reservation_key(
            &reservation.uid,
            reservation.eid.get(),
            reservation.first_seat,
        );
        self.put(ACCOUNT_RESERVATIONS, &key, &to_cbor(reservation)?)
    }

    fn remove_event_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        let key = encode_event_reservation_key(reservation.eid, reservation.first_seat);
        self.remove(EVENT_RESERVATIONS, &key)
    }

    fn event_reservations(&self, eid: EventId) -> Result<Vec<Reservation>, StorageError> {
        let start = encode_event_reservation_key(eid, 0);
        let end = encode_event_reservation_key(eid, u16::MAX);
        self.scan(EVENT_RESERVATIONS, &start, &end)?
            .iter()
            .map(|(_, value)| from_cbor(value))
            .collect()
    }
}
