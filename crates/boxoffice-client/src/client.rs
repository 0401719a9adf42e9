//! Client session state.
//!
//! The `Client` remembers which account is logged in and builds requests on
//! its behalf. It performs no I/O: the caller sends each request, then feeds
//! the reply back through [`Client::handle_response`] so the session follows
//! what the server decided.

use boxoffice_proto::{
    AccountId, Capacity, EventDate, EventId, EventName, Filename, Password, Request, Response,
    SeatCount, Status,
};
use bytes::Bytes;

use crate::error::ClientError;

/// Account the client acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account id
    pub uid: AccountId,
    /// Current password
    pub password: Password,
}

/// Session state machine.
#[derive(Debug, Default)]
pub struct Client {
    session: Option<Credentials>,
}

impl Client {
    /// Create a logged-out client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Logged-in account, if any.
    pub fn session(&self) -> Option<&Credentials> {
        self.session.as_ref()
    }

    /// Check if an account is logged in.
    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    /// `LIN`. Refused locally while another account is logged in.
    pub fn login(&self, uid: &str, password: &str) -> Result<Request, ClientError> {
        if let Some(session) = &self.session {
            return Err(ClientError::AlreadyLoggedIn(session.uid.as_str().to_string()));
        }
        Ok(Request::Login { uid: AccountId::parse(uid)?, password: Password::parse(password)? })
    }

    /// `LOU`
    pub fn logout(&self) -> Result<Request, ClientError> {
        let Credentials { uid, password } = self.require_session()?;
        Ok(Request::Logout { uid, password })
    }

    /// `UNR`
    pub fn unregister(&self) -> Result<Request, ClientError> {
        let Credentials { uid, password } = self.require_session()?;
        Ok(Request::Unregister { uid, password })
    }

    /// `LME`
    pub fn my_events(&self) -> Result<Request, ClientError> {
        let Credentials { uid, password } = self.require_session()?;
        Ok(Request::MyEvents { uid, password })
    }

    /// `LMR`
    pub fn my_reservations(&self) -> Result<Request, ClientError> {
        let Credentials { uid, password } = self.require_session()?;
        Ok(Request::MyReservations { uid, password })
    }

    /// `CRE`. `date` is `dd-mm-yyyy`, `time` is `hh:mm`.
    pub fn create(
        &self,
        name: &str,
        date: &str,
        time: &str,
        capacity: &str,
        filename: &str,
        description: impl Into<Bytes>,
    ) -> Result<Request, ClientError> {
        let Credentials { uid, password } = self.require_session()?;
        Ok(Request::Create {
            uid,
            password,
            name: EventName::parse(name)?,
            start: EventDate::parse(date, time)?,
            capacity: Capacity::parse(capacity)?,
            filename: Filename::parse(filename)?,
            description: description.into(),
        })
    }

    /// `LST`. Needs no session.
    pub fn list(&self) -> Request {
        Request::List
    }

    /// `SED`. Needs no session.
    pub fn show(&self, eid: &str) -> Result<Request, ClientError> {
        Ok(Request::Show { eid: EventId::parse(eid)? })
    }

    /// `CLS`
    pub fn close(&self, eid: &str) -> Result<Request, ClientError> {
        let Credentials { uid, password } = self.require_session()?;
        Ok(Request::Close { uid, password, eid: EventId::parse(eid)? })
    }

    /// `RID`
    pub fn reserve(&self, eid: &str, seats: &str) -> Result<Request, ClientError> {
        let Credentials { uid, password } = self.require_session()?;
        Ok(Request::Reserve {
            uid,
            password,
            eid: EventId::parse(eid)?,
            seats: SeatCount::parse(seats)?,
        })
    }

    /// `CPS`
    pub fn change_password(&self, new: &str) -> Result<Request, ClientError> {
        let Credentials { uid, password } = self.require_session()?;
        Ok(Request::ChangePassword { uid, old: password, new: Password::parse(new)? })
    }

    /// Update the session from the reply to `request`.
    pub fn handle_response(&mut self, request: &Request, response: &Response) {
        let Response::Status { status, .. } = response else {
            return;
        };

        match (request, status) {
            (Request::Login { uid, password }, Status::Ok | Status::Reg) => {
                self.session = Some(Credentials { uid: uid.clone(), password: password.clone() });
            },
            (Request::Logout { .. } | Request::Unregister { .. }, Status::Ok) => {
                self.session = None;
            },
            (Request::ChangePassword { new, .. }, Status::Ok) => {
                if let Some(session) = &mut self.session {
                    session.password = new.clone();
                }
            },
            _ => {},
        }
    }

    fn require_session(&self) -> Result<Credentials, ClientError> {
        self.session.clone().ok_or(ClientError::NotLoggedIn)
    }
}
