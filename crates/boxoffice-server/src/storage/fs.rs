//! Filesystem-backed storage.
//!
//! Every record is a small text file, so the data directory can be inspected
//! and repaired by hand:
//!
//! ```text
//! USERS/<uid>/<uid>_pass.txt                      password
//! USERS/<uid>/<uid>_login.txt                     present while logged in
//! USERS/<uid>/CREATED/<eid>.txt                   created-events index
//! USERS/<uid>/RESERVED/R-<uid>-<eid>-<stamp>-<first>.txt
//! EVENTS/eid.dat                                  next event id
//! EVENTS/<eid>/START_<eid>.txt                    uid name fname capacity date time
//! EVENTS/<eid>/RES_<eid>.txt                      reserved count
//! EVENTS/<eid>/END_<eid>.txt                      closure marker
//! EVENTS/<eid>/DESCRIPTION/<fname>                description file
//! EVENTS/<eid>/RESERVATIONS/R-<uid>-<stamp>-<first>.txt
//! ```
//!
//! `<stamp>` is `yyyymmdd-hhmmss` and `<first>` the zero-padded first seat,
//! which keeps two reservations made in the same second apart. Reservation
//! files hold `uid eid seats dd-mm-yyyy hh:mm:ss first`.

#![allow(clippy::disallowed_types, reason = "Serializing event id allocation")]

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use boxoffice_core::{ClosureMarker, ClosureReason, EventMeta, Reservation};
use boxoffice_proto::{
    AccountId, Capacity, EventDate, EventId, EventName, Filename, Password, SeatCount, Timestamp,
};

use super::{Storage, StorageError};

const USERS_DIR: &str = "USERS";
const EVENTS_DIR: &str = "EVENTS";
const COUNTER_FILE: &str = "eid.dat";

/// Storage rooted at a data directory.
#[derive(Clone)]
pub struct FsStorage {
    root: Arc<PathBuf>,
    allocation: Arc<Mutex<()>>,
}

impl FsStorage {
    /// Opens the data directory, creating the top-level layout if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(USERS_DIR))?;
        fs::create_dir_all(root.join(EVENTS_DIR))?;
        Ok(Self { root: Arc::new(root), allocation: Arc::new(Mutex::new(())) })
    }

    /// Data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, uid: &AccountId) -> PathBuf {
        self.root.join(USERS_DIR).join(uid.as_str())
    }

    fn password_path(&self, uid: &AccountId) -> PathBuf {
        self.user_dir(uid).join(format!("{uid}_pass.txt"))
    }

    fn session_path(&self, uid: &AccountId) -> PathBuf {
        self.user_dir(uid).join(format!("{uid}_login.txt"))
    }

    fn created_dir(&self, uid: &AccountId) -> PathBuf {
        self.user_dir(uid).join("CREATED")
    }

    fn reserved_dir(&self, uid: &AccountId) -> PathBuf {
        self.user_dir(uid).join("RESERVED")
    }

    fn event_dir(&self, eid: EventId) -> PathBuf {
        self.root.join(EVENTS_DIR).join(eid.to_string())
    }

    fn start_path(&self, eid: EventId) -> PathBuf {
        self.event_dir(eid).join(format!("START_{eid}.txt"))
    }

    fn reserved_count_path(&self, eid: EventId) -> PathBuf {
        self.event_dir(eid).join(format!("RES_{eid}.txt"))
    }

    fn end_path(&self, eid: EventId) -> PathBuf {
        self.event_dir(eid).join(format!("END_{eid}.txt"))
    }

    fn description_dir(&self, eid: EventId) -> PathBuf {
        self.event_dir(eid).join("DESCRIPTION")
    }

    fn event_reservations_dir(&self, eid: EventId) -> PathBuf {
        self.event_dir(eid).join("RESERVATIONS")
    }

    fn counter_path(&self) -> PathBuf {
        self.root.join(EVENTS_DIR).join(COUNTER_FILE)
    }

    fn account_reservation_path(&self, r: &Reservation) -> PathBuf {
        let name = format!("R-{}-{}-{}-{:03}.txt", r.uid, r.eid, compact_stamp(&r.reserved_at), r.first_seat);
        self.reserved_dir(&r.uid).join(name)
    }

    fn event_reservation_path(&self, r: &Reservation) -> PathBuf {
        let name = format!("R-{}-{}-{:03}.txt", r.uid, compact_stamp(&r.reserved_at), r.first_seat);
        self.event_reservations_dir(r.eid).join(name)
    }

    /// Next id in `1..=1000`; 1000 means the id space is used up.
    fn read_counter(&self) -> Result<u16, StorageError> {
        match read_optional(&self.counter_path())? {
            None => Ok(EventId::FIRST.get()),
            Some(text) => text
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|next| (1..=EventId::LAST.get() + 1).contains(next))
                .ok_or_else(|| StorageError::Corrupt(format!("{COUNTER_FILE}: {text:?}"))),
        }
    }

    /// Start record of `eid`, whether or not its creation finished.
    fn read_start(&self, eid: EventId) -> Result<Option<EventMeta>, StorageError> {
        let path = self.start_path(eid);
        read_optional(&path)?.map(|text| parse_meta(&path, &text)).transpose()
    }

    fn remove_account_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        remove_if_exists(&self.account_reservation_path(reservation))
    }

    /// Removes what an interrupted creation left under `eid`, including the
    /// account-side twins of any reservation filed against it.
    fn discard_orphan(&self, eid: EventId) -> Result<(), StorageError> {
        let dir = self.event_dir(eid);
        if !dir.try_exists()? {
            return Ok(());
        }
        if let Ok(Some(meta)) = self.read_start(eid) {
            remove_if_exists(&self.created_dir(&meta.owner).join(format!("{eid}.txt")))?;
        }
        for path in list_files(&self.event_reservations_dir(eid))? {
            if let Ok(reservation) = parse_reservation(&path) {
                self.remove_account_reservation(&reservation)?;
            }
        }
        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}

fn compact_stamp(ts: &Timestamp) -> String {
    ts.as_datetime().format("%Y%m%d-%H%M%S").to_string()
}

fn read_optional(path: &Path) -> Result<Option<String>, StorageError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_synced(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Files in `dir`, or nothing if it does not exist.
fn list_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}

fn corrupt(path: &Path, what: impl std::fmt::Display) -> StorageError {
    StorageError::Corrupt(format!("{}: {what}", path.display()))
}

fn format_meta(meta: &EventMeta) -> String {
    format!("{} {} {} {} {}\n", meta.owner, meta.name, meta.filename, meta.capacity, meta.start)
}

fn parse_meta(path: &Path, text: &str) -> Result<EventMeta, StorageError> {
    let tokens: Vec<&str> = text.split_ascii_whitespace().collect();
    let [owner, name, filename, capacity, date, time] = tokens.as_slice() else {
        return Err(corrupt(path, "start record needs 6 fields"));
    };
    Ok(EventMeta {
        owner: AccountId::parse(owner).map_err(|e| corrupt(path, e))?,
        name: EventName::parse(name).map_err(|e| corrupt(path, e))?,
        filename: Filename::parse(filename).map_err(|e| corrupt(path, e))?,
        capacity: Capacity::parse(capacity).map_err(|e| corrupt(path, e))?,
        start: EventDate::parse(date, time).map_err(|e| corrupt(path, e))?,
    })
}

fn format_reservation(r: &Reservation) -> String {
    format!("{} {} {} {} {}\n", r.uid, r.eid, r.seats, r.reserved_at, r.first_seat)
}

fn parse_reservation(path: &Path) -> Result<Reservation, StorageError> {
    let text = fs::read_to_string(path)?;
    let tokens: Vec<&str> = text.split_ascii_whitespace().collect();
    let [uid, eid, seats, date, time, first] = tokens.as_slice() else {
        return Err(corrupt(path, "reservation record needs 6 fields"));
    };
    Ok(Reservation {
        uid: AccountId::parse(uid).map_err(|e| corrupt(path, e))?,
        eid: EventId::parse(eid).map_err(|e| corrupt(path, e))?,
        seats: SeatCount::parse(seats).map_err(|e| corrupt(path, e))?,
        reserved_at: Timestamp::parse(date, time).map_err(|e| corrupt(path, e))?,
        first_seat: first.parse().map_err(|e| corrupt(path, e))?,
    })
}

fn parse_marker(path: &Path, text: &str) -> Result<ClosureMarker, StorageError> {
    let tokens: Vec<&str> = text.split_ascii_whitespace().collect();
    let [date, time, reason] = tokens.as_slice() else {
        return Err(corrupt(path, "closure record needs 3 fields"));
    };
    Ok(ClosureMarker {
        closed_at: Timestamp::parse(date, time).map_err(|e| corrupt(path, e))?,
        reason: ClosureReason::parse(reason).ok_or_else(|| corrupt(path, "unknown reason"))?,
    })
}

impl Storage for FsStorage {
    fn account_exists(&self, uid: &AccountId) -> Result<bool, StorageError> {
        Ok(self.password_path(uid).try_exists()?)
    }

    fn password_matches(
        &self,
        uid: &AccountId,
        candidate: &Password,
    ) -> Result<bool, StorageError> {
        let stored = read_optional(&self.password_path(uid))?;
        Ok(stored.is_some_and(|text| text.trim_end() == candidate.as_str()))
    }

    fn has_session(&self, uid: &AccountId) -> Result<bool, StorageError> {
        Ok(self.session_path(uid).try_exists()?)
    }

    fn create_account(&self, uid: &AccountId, password: &Password) -> Result<(), StorageError> {
        fs::create_dir_all(self.user_dir(uid))?;
        write_synced(&self.password_path(uid), format!("{password}\n").as_bytes())?;
        write_synced(&self.session_path(uid), b"")
    }

    fn open_session(&self, uid: &AccountId) -> Result<(), StorageError> {
        write_synced(&self.session_path(uid), b"")
    }

    fn close_session(&self, uid: &AccountId) -> Result<(), StorageError> {
        remove_if_exists(&self.session_path(uid))
    }

    fn change_password(&self, uid: &AccountId, password: &Password) -> Result<(), StorageError> {
        write_synced(&self.password_path(uid), format!("{password}\n").as_bytes())
    }

    fn delete_account(&self, uid: &AccountId) -> Result<(), StorageError> {
        remove_if_exists(&self.session_path(uid))?;
        remove_if_exists(&self.password_path(uid))
    }

    fn created_events(&self, uid: &AccountId) -> Result<Vec<EventId>, StorageError> {
        let next = self.read_counter()?;
        let mut ids = Vec::new();
        for path in list_files(&self.created_dir(uid))? {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            // Index entries of an interrupted create sit at or above the counter.
            if let Some(eid) = name.strip_suffix(".txt").and_then(|s| EventId::parse(s).ok())
                && eid.get() < next
            {
                ids.push(eid);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn account_reservations(&self, uid: &AccountId) -> Result<Vec<Reservation>, StorageError> {
        let next = self.read_counter()?;
        let mut records = Vec::new();
        for path in list_files(&self.reserved_dir(uid))? {
            let record = parse_reservation(&path)?;
            if record.eid.get() < next {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn next_event_id(&self) -> Result<EventId, StorageError> {
        EventId::new(self.read_counter()?).ok_or(StorageError::Exhausted)
    }

    fn create_event(&self, meta: &EventMeta, description: &[u8]) -> Result<EventId, StorageError> {
        let _allocation = self.allocation.lock().unwrap_or_else(PoisonError::into_inner);
        let eid = self.next_event_id()?;

        self.discard_orphan(eid)?;
        fs::create_dir_all(self.description_dir(eid))?;
        fs::create_dir_all(self.event_reservations_dir(eid))?;

        write_synced(&self.description_dir(eid).join(meta.filename.as_str()), description)?;
        write_synced(&self.start_path(eid), format_meta(meta).as_bytes())?;
        write_synced(&self.reserved_count_path(eid), b"0\n")?;

        let created_dir = self.created_dir(&meta.owner);
        fs::create_dir_all(&created_dir)?;
        write_synced(&created_dir.join(format!("{eid}.txt")), b"")?;

        write_synced(&self.counter_path(), format!("{}\n", eid.get() + 1).as_bytes())?;
        Ok(eid)
    }

    fn read_meta(&self, eid: EventId) -> Result<Option<EventMeta>, StorageError> {
        // An event at or above the counter never finished being created.
        if eid.get() >= self.read_counter()? {
            return Ok(None);
        }
        self.read_start(eid)
    }

    fn read_description(&self, eid: EventId) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(meta) = self.read_meta(eid)? else {
            return Ok(None);
        };
        let path = self.description_dir(eid).join(meta.filename.as_str());
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(corrupt(&path, "description file missing"))
            },
            Err(e) => Err(e.into()),
        }
    }

    fn read_reserved_count(&self, eid: EventId) -> Result<u16, StorageError> {
        let path = self.reserved_count_path(eid);
        let text = read_optional(&path)?.ok_or_else(|| corrupt(&path, "missing"))?;
        text.trim().parse().map_err(|e| corrupt(&path, e))
    }

    fn write_reserved_count(&self, eid: EventId, count: u16) -> Result<(), StorageError> {
        write_synced(&self.reserved_count_path(eid), format!("{count}\n").as_bytes())
    }

    fn mark_closed(&self, eid: EventId, marker: &ClosureMarker) -> Result<bool, StorageError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(self.end_path(eid)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.write_all(format!("{} {}\n", marker.closed_at, marker.reason).as_bytes())?;
        file.sync_all()?;
        Ok(true)
    }

    fn closure_marker(&self, eid: EventId) -> Result<Option<ClosureMarker>, StorageError> {
        let path = self.end_path(eid);
        read_optional(&path)?.map(|text| parse_marker(&path, &text)).transpose()
    }

    fn is_closed(&self, eid: EventId) -> Result<bool, StorageError> {
        Ok(self.end_path(eid).try_exists()?)
    }

    fn list_event_ids(&self) -> Result<Vec<EventId>, StorageError> {
        let next = self.read_counter()?;
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join(EVENTS_DIR))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if let Some(eid) = name.to_str().and_then(|s| EventId::parse(s).ok())
                && eid.get() < next
            {
                ids.push(eid);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn append_event_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        let dir = self.event_reservations_dir(reservation.eid);
        fs::create_dir_all(&dir)?;
        let path = self.event_reservation_path(reservation);
        write_synced(&path, format_reservation(reservation).as_bytes())
    }

    fn append_account_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        fs::create_dir_all(self.reserved_dir(&reservation.uid))?;
        let path = self.account_reservation_path(reservation);
        write_synced(&path, format_reservation(reservation).as_bytes())
    }

    fn remove_event_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        remove_if_exists(&self.event_reservation_path(reservation))
    }

    fn event_reservations(&self, eid: EventId) -> Result<Vec<Reservation>, StorageError> {
        let mut records = list_files(&self.event_reservations_dir(eid))?
            .iter()
            .map(|path| parse_reservation(path))
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by_key(|r| r.first_seat);
        Ok(records)
    }
}
