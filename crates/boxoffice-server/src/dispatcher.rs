//! Per-verb request handling.
//!
//! Requests reaching the dispatcher are already syntactically valid: the
//! codec checked the verb, the argument count and every field. What is left
//! is, in order, credentials, session state, then the verb's own checks
//! against stored state. The first failing check decides the reply.
//!
//! Handlers return `Err` only for storage and data failures; the driver
//! answers those with the verb's `NOK`.

use boxoffice_core::{ClosureMarker, ClosureReason, Environment, EventMeta, Reservation};
use boxoffice_proto::{
    AccountId, Capacity, EventDate, EventDetails, EventId, EventName, EventState, EventSummary,
    Filename, Password, Request, Response, SeatCount, Status, Timestamp, Verb,
};
use bytes::Bytes;

use crate::{
    ledger::{self, ReserveOutcome},
    lifecycle,
    locks::{AccountLocks, EventLocks},
    server_error::DriverError,
    storage::{Storage, StorageError},
};

/// Reply codes for each way a credential check can fail.
#[derive(Debug, Clone, Copy)]
struct AuthCodes {
    unknown_account: Status,
    wrong_password: Status,
    no_session: Status,
}

/// `LOU`, `UNR`
const SESSION_CODES: AuthCodes = AuthCodes {
    unknown_account: Status::Unr,
    wrong_password: Status::Wrp,
    no_session: Status::Nok,
};

/// `LME`, `LMR`, `CRE`, `RID`
const MEMBER_CODES: AuthCodes = AuthCodes {
    unknown_account: Status::Wrp,
    wrong_password: Status::Wrp,
    no_session: Status::Nlg,
};

/// `CLS`
const CLOSE_CODES: AuthCodes = AuthCodes {
    unknown_account: Status::Nok,
    wrong_password: Status::Nok,
    no_session: Status::Nlg,
};

/// `CPS`
const CHANGE_PASSWORD_CODES: AuthCodes = AuthCodes {
    unknown_account: Status::Nid,
    wrong_password: Status::Nok,
    no_session: Status::Nlg,
};

/// Executes validated requests against storage.
pub struct Dispatcher<E, S>
where
    E: Environment,
    S: Storage,
{
    env: E,
    storage: S,
    events: EventLocks,
    accounts: AccountLocks,
    max_reservations_listed: usize,
}

impl<E, S> Dispatcher<E, S>
where
    E: Environment,
    S: Storage,
{
    /// Create a dispatcher. `LMR` replies list at most
    /// `max_reservations_listed` records.
    pub fn new(env: E, storage: S, max_reservations_listed: usize) -> Self {
        Self {
            env,
            storage,
            events: EventLocks::new(),
            accounts: AccountLocks::default(),
            max_reservations_listed,
        }
    }

    /// Storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Handles one request.
    pub fn handle(&self, request: Request) -> Result<Response, DriverError> {
        match request {
            Request::Login { uid, password } => self.login(&uid, &password),
            Request::Logout { uid, password } => self.logout(&uid, &password),
            Request::Unregister { uid, password } => self.unregister(&uid, &password),
            Request::MyEvents { uid, password } => self.my_events(&uid, &password),
            Request::MyReservations { uid, password } => self.my_reservations(&uid, &password),
            Request::Create { uid, password, name, start, capacity, filename, description } => {
                self.create(&uid, &password, name, start, capacity, filename, &description)
            },
            Request::List => self.list(),
            Request::Show { eid } => self.show(eid),
            Request::Close { uid, password, eid } => self.close(&uid, &password, eid),
            Request::Reserve { uid, password, eid, seats } => {
                self.reserve(&uid, &password, eid, seats)
            },
            Request::ChangePassword { uid, old, new } => self.change_password(&uid, &old, &new),
        }
    }

    /// First failing credential check, mapped through `codes`.
    fn refusal(
        &self,
        uid: &AccountId,
        password: &Password,
        codes: AuthCodes,
    ) -> Result<Option<Status>, StorageError> {
        if !self.storage.account_exists(uid)? {
            return Ok(Some(codes.unknown_account));
        }
        if !self.storage.password_matches(uid, password)? {
            return Ok(Some(codes.wrong_password));
        }
        if !self.storage.has_session(uid)? {
            return Ok(Some(codes.no_session));
        }
        Ok(None)
    }

    fn login(&self, uid: &AccountId, password: &Password) -> Result<Response, DriverError> {
        let _account = self.accounts.lock(uid);

        if !self.storage.account_exists(uid)? {
            self.storage.create_account(uid, password)?;
            return Ok(Response::status(Verb::Lin, Status::Reg));
        }
        if !self.storage.password_matches(uid, password)? {
            return Ok(Response::status(Verb::Lin, Status::Nok));
        }
        self.storage.open_session(uid)?;
        Ok(Response::status(Verb::Lin, Status::Ok))
    }

    fn logout(&self, uid: &AccountId, password: &Password) -> Result<Response, DriverError> {
        let _account = self.accounts.lock(uid);

        if let Some(status) = self.refusal(uid, password, SESSION_CODES)? {
            return Ok(Response::status(Verb::Lou, status));
        }
        self.storage.close_session(uid)?;
        Ok(Response::status(Verb::Lou, Status::Ok))
    }

    fn unregister(&self, uid: &AccountId, password: &Password) -> Result<Response, DriverError> {
        let _account = self.accounts.lock(uid);

        if let Some(status) = self.refusal(uid, password, SESSION_CODES)? {
            return Ok(Response::status(Verb::Unr, status));
        }
        self.storage.delete_account(uid)?;
        Ok(Response::status(Verb::Unr, Status::Ok))
    }

    fn my_events(&self, uid: &AccountId, password: &Password) -> Result<Response, DriverError> {
        if let Some(status) = self.refusal(uid, password, MEMBER_CODES)? {
            return Ok(Response::status(Verb::Lme, status));
        }

        let ids = self.storage.created_events(uid)?;
        if ids.is_empty() {
            return Ok(Response::status(Verb::Lme, Status::Nok));
        }

        let now = self.env.now();
        let mut events = Vec::with_capacity(ids.len());
        for eid in ids {
            let _event = self.events.lock(eid);
            events.push((eid, lifecycle::state(&self.storage, eid, now)?));
        }
        Ok(Response::MyEvents(events))
    }

    fn my_reservations(
        &self,
        uid: &AccountId,
        password: &Password,
    ) -> Result<Response, DriverError> {
        if let Some(status) = self.refusal(uid, password, MEMBER_CODES)? {
            return Ok(Response::status(Verb::Lmr, status));
        }

        let mut records = self.storage.account_reservations(uid)?;
        if records.is_empty() {
            return Ok(Response::status(Verb::Lmr, Status::Nok));
        }

        // Most recent first.
        records.sort_by(|a, b| {
            b.reserved_at
                .cmp(&a.reserved_at)
                .then(b.eid.cmp(&a.eid))
                .then(b.first_seat.cmp(&a.first_seat))
        });
        records.truncate(self.max_reservations_listed);
        Ok(Response::MyReservations(records.iter().map(Reservation::summary).collect()))
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        &self,
        uid: &AccountId,
        password: &Password,
        name: EventName,
        start: EventDate,
        capacity: Capacity,
        filename: Filename,
        description: &Bytes,
    ) -> Result<Response, DriverError> {
        if let Some(status) = self.refusal(uid, password, MEMBER_CODES)? {
            return Ok(Response::status(Verb::Cre, status));
        }

        let meta = EventMeta { owner: uid.clone(), name, filename, capacity, start };
        let eid = self.storage.create_event(&meta, description)?;
        Ok(Response::Created { eid })
    }

    fn list(&self) -> Result<Response, DriverError> {
        let ids = self.storage.list_event_ids()?;
        if ids.is_empty() {
            return Ok(Response::status(Verb::Lst, Status::Nok));
        }

        let now = self.env.now();
        let mut events = Vec::with_capacity(ids.len());
        for eid in ids {
            let _event = self.events.lock(eid);
            let evaluation = lifecycle::evaluate(&self.storage, eid, now)?;
            events.push(EventSummary {
                eid,
                name: evaluation.meta.name,
                state: evaluation.state,
                start: evaluation.meta.start,
            });
        }
        Ok(Response::EventList(events))
    }

    fn show(&self, eid: EventId) -> Result<Response, DriverError> {
        let _event = self.events.lock(eid);

        if self.storage.read_meta(eid)?.is_none() {
            return Ok(Response::status(Verb::Sed, Status::Nok));
        }

        let evaluation = lifecycle::evaluate(&self.storage, eid, self.env.now())?;
        let description = self
            .storage
            .read_description(eid)?
            .ok_or_else(|| StorageError::Corrupt(format!("event {eid} has no description")))?;

        let meta = evaluation.meta;
        Ok(Response::EventDetails(EventDetails {
            owner: meta.owner,
            name: meta.name,
            start: meta.start,
            capacity: meta.capacity,
            reserved: evaluation.reserved,
            filename: meta.filename,
            description: Bytes::from(description),
        }))
    }

    fn close(
        &self,
        uid: &AccountId,
        password: &Password,
        eid: EventId,
    ) -> Result<Response, DriverError> {
        if let Some(status) = self.refusal(uid, password, CLOSE_CODES)? {
            return Ok(Response::status(Verb::Cls, status));
        }

        let _event = self.events.lock(eid);

        let Some(owner) = self.storage.owner_of(eid)? else {
            return Ok(Response::status(Verb::Cls, Status::Noe));
        };
        if owner != *uid {
            return Ok(Response::status(Verb::Cls, Status::Eow));
        }

        let now = self.env.now();
        let status = match lifecycle::state(&self.storage, eid, now)? {
            EventState::Closed => Status::Clo,
            EventState::Past => Status::Pst,
            EventState::SoldOut => Status::Sld,
            EventState::Active => {
                let marker = ClosureMarker {
                    closed_at: Timestamp::from_datetime(now),
                    reason: ClosureReason::ClosedByOwner,
                };
                if self.storage.mark_closed(eid, &marker)? { Status::Ok } else { Status::Clo }
            },
        };
        Ok(Response::status(Verb::Cls, status))
    }

    fn reserve(
        &self,
        uid: &AccountId,
        password: &Password,
        eid: EventId,
        seats: SeatCount,
    ) -> Result<Response, DriverError> {
        if let Some(status) = self.refusal(uid, password, MEMBER_CODES)? {
            return Ok(Response::status(Verb::Rid, status));
        }

        let _event = self.events.lock(eid);

        if self.storage.read_meta(eid)?.is_none() {
            return Ok(Response::status(Verb::Rid, Status::Nok));
        }

        let status = match ledger::reserve(&self.storage, eid, uid, seats, self.env.now())? {
            ReserveOutcome::Accepted(_) => Status::Acc,
            ReserveOutcome::Rejected { available } => return Ok(Response::Rejected { available }),
            ReserveOutcome::NotActive(EventState::Closed) => Status::Cls,
            ReserveOutcome::NotActive(EventState::Past) => Status::Pst,
            ReserveOutcome::NotActive(EventState::SoldOut) => Status::Sld,
            // The ledger never reports an active event as refusing.
            ReserveOutcome::NotActive(EventState::Active) => Status::Nok,
        };
        Ok(Response::status(Verb::Rid, status))
    }

    fn change_password(
        &self,
        uid: &AccountId,
        old: &Password,
        new: &Password,
    ) -> Result<Response, DriverError> {
        let _account = self.accounts.lock(uid);

        if let Some(status) = self.refusal(uid, old, CHANGE_PASSWORD_CODES)? {
            return Ok(Response::status(Verb::Cps, status));
        }
        self.storage.change_password(uid, new)?;
        Ok(Response::status(Verb::Cps, Status::Ok))
    }
}

/// Account named by a request, for logging.
pub(crate) fn account_of(request: &Request) -> Option<&AccountId> {
    match request {
        Request::Login { uid, .. }
        | Request::Logout { uid, .. }
        | Request::Unregister { uid, .. }
        | Request::MyEvents { uid, .. }
        | Request::MyReservations { uid, .. }
        | Request::Create { uid, .. }
        | Request::Close { uid, .. }
        | Request::Reserve { uid, .. }
        | Request::ChangePassword { uid, .. } => Some(uid),
        Request::List | Request::Show { .. } => None,
    }
}
