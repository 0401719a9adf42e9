//! Fuzz target for request handling under storage failures
//!
//! Drives the dispatcher with a mixed stream of account, event and
//! reservation requests while `ChaoticStorage` fails operations at a
//! fuzzer-chosen rate.
//!
//! # Strategy
//!
//! - Variable failure rates (0% to 90%)
//! - Either every operation may fail, or only the reservation record writes
//! - A manual clock that moves forward between requests so events expire
//!
//! # Invariants
//!
//! - The dispatcher NEVER panics on storage errors
//! - No event is ever oversold: reserved count <= capacity
//! - With record-write failures only, every rollback succeeds, so the
//!   reserved count equals the seats held by event-side records and each
//!   event-side record has its account-side twin

#![no_main]

use arbitrary::Arbitrary;
use boxoffice_core::{Environment, ManualEnv};
use boxoffice_proto::{
    AccountId, Capacity, EventDate, EventId, EventName, Filename, Password, Request, SeatCount,
};
use boxoffice_server::{ChaoticStorage, Dispatcher, MemoryStorage, Storage, StorageOp};
use bytes::Bytes;
use chrono::{NaiveDate, TimeDelta};
use libfuzzer_sys::fuzz_target;

const USERS: [&str; 3] = ["100001", "100002", "100003"];
const PASSWORDS: [&str; 2] = ["pass1234", "other999"];

#[derive(Debug, Clone, Arbitrary)]
struct ChaosScenario {
    /// Seed for ChaoticStorage RNG (deterministic failures)
    chaos_seed: u64,
    /// Failure rate 0-9 maps to 0%-90%
    failure_rate_tenth: u8,
    /// Restrict failures to reservation record writes
    records_only: bool,
    operations: Vec<ChaosOperation>,
}

#[derive(Debug, Clone, Arbitrary)]
enum ChaosOperation {
    Login { user: u8, password: u8 },
    Logout { user: u8 },
    Unregister { user: u8 },
    ChangePassword { user: u8, new: u8 },
    MyEvents { user: u8 },
    MyReservations { user: u8 },
    Create { user: u8, capacity: u8, days_ahead: u8 },
    List,
    Show { eid: u8 },
    Close { user: u8, eid: u8 },
    Reserve { user: u8, eid: u8, seats: u8 },
    /// Move the clock forward by this many hours
    Tick { hours: u8 },
}

fn uid(user: u8) -> AccountId {
    AccountId::parse(USERS[usize::from(user) % USERS.len()]).unwrap_or_else(|_| unreachable!())
}

fn password(index: u8) -> Password {
    Password::parse(PASSWORDS[usize::from(index) % PASSWORDS.len()])
        .unwrap_or_else(|_| unreachable!())
}

fn eid(raw: u8) -> EventId {
    EventId::new(u16::from(raw % 8) + 1).unwrap_or(EventId::FIRST)
}

fn request(op: &ChaosOperation, env: &ManualEnv) -> Option<Request> {
    let request = match *op {
        ChaosOperation::Login { user, password: pw } => {
            Request::Login { uid: uid(user), password: password(pw) }
        },
        ChaosOperation::Logout { user } => {
            Request::Logout { uid: uid(user), password: password(0) }
        },
        ChaosOperation::Unregister { user } => {
            Request::Unregister { uid: uid(user), password: password(0) }
        },
        ChaosOperation::ChangePassword { user, new } => {
            Request::ChangePassword { uid: uid(user), old: password(0), new: password(new) }
        },
        ChaosOperation::MyEvents { user } => {
            Request::MyEvents { uid: uid(user), password: password(0) }
        },
        ChaosOperation::MyReservations { user } => {
            Request::MyReservations { uid: uid(user), password: password(0) }
        },
        ChaosOperation::Create { user, capacity, days_ahead } => Request::Create {
            uid: uid(user),
            password: password(0),
            name: EventName::parse("Chaos").ok()?,
            start: EventDate::from_datetime(
                env.now() + TimeDelta::days(i64::from(days_ahead % 4)),
            ),
            capacity: Capacity::new(u16::from(capacity).max(10))?,
            filename: Filename::parse("chaos.txt").ok()?,
            description: Bytes::from_static(b"chaos"),
        },
        ChaosOperation::List => Request::List,
        ChaosOperation::Show { eid: raw } => Request::Show { eid: eid(raw) },
        ChaosOperation::Close { user, eid: raw } => {
            Request::Close { uid: uid(user), password: password(0), eid: eid(raw) }
        },
        ChaosOperation::Reserve { user, eid: raw, seats } => Request::Reserve {
            uid: uid(user),
            password: password(0),
            eid: eid(raw),
            seats: SeatCount::new(u16::from(seats % 40) + 1)?,
        },
        ChaosOperation::Tick { .. } => return None,
    };
    Some(request)
}

fn check_ledger<S: Storage>(storage: &S, strict: bool) {
    let Ok(ids) = storage.list_event_ids() else { return };
    for eid in ids {
        let (Ok(Some(meta)), Ok(count), Ok(records)) = (
            storage.read_meta(eid),
            storage.read_reserved_count(eid),
            storage.event_reservations(eid),
        ) else {
            continue;
        };

        assert!(count <= meta.capacity.get(), "event {eid} oversold: {count}");

        if strict {
            let recorded: u16 = records.iter().map(|r| r.seats.get()).sum();
            assert_eq!(count, recorded, "count drifted from records on event {eid}");
            for record in &records {
                let twins = storage.account_reservations(&record.uid).unwrap_or_default();
                assert!(twins.contains(record), "record on event {eid} lacks its twin");
            }
        }
    }
}

fuzz_target!(|scenario: ChaosScenario| {
    let failure_rate = f64::from(scenario.failure_rate_tenth % 10) / 10.0;
    let mut storage =
        ChaoticStorage::with_seed(MemoryStorage::new(), failure_rate, scenario.chaos_seed);
    if scenario.records_only {
        storage = storage
            .with_scope([StorageOp::AppendEventReservation, StorageOp::AppendAccountReservation]);
    }

    let start = NaiveDate::from_ymd_opt(2030, 1, 1)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .unwrap_or_default();
    let env = ManualEnv::new(start);
    let dispatcher = Dispatcher::new(env.clone(), storage, 50);

    for op in scenario.operations.iter().take(64) {
        if let ChaosOperation::Tick { hours } = op {
            env.advance(TimeDelta::hours(i64::from(*hours % 48)));
            continue;
        }
        let Some(request) = request(op, &env) else { continue };

        // Storage errors surface as Err; they must never panic.
        let _ = dispatcher.handle(request);

        check_ledger(dispatcher.storage().inner(), scenario.records_only);
    }
});
