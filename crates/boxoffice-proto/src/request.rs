//! Request verbs and their argument grammar.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    AccountId, Capacity, EventDate, EventId, EventName, FieldError, Filename, Password, SeatCount,
    errors::{ProtocolError, Result},
};

/// Transport a verb is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Connectionless, one request per datagram
    Datagram,
    /// Connection oriented, one request per connection
    Stream,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Datagram => "UDP",
            Self::Stream => "TCP",
        })
    }
}

/// The eleven protocol verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Log in, registering unknown accounts
    Lin,
    /// Log out
    Lou,
    /// Remove account credentials
    Unr,
    /// List events created by the account
    Lme,
    /// List reservations made by the account
    Lmr,
    /// Create an event with a description file
    Cre,
    /// List all events
    Lst,
    /// Show one event with its description file
    Sed,
    /// Close an event
    Cls,
    /// Reserve seats
    Rid,
    /// Change password
    Cps,
}

impl Verb {
    /// Every verb, in grammar order.
    pub const ALL: [Self; 11] = [
        Self::Lin,
        Self::Lou,
        Self::Unr,
        Self::Lme,
        Self::Lmr,
        Self::Cre,
        Self::Lst,
        Self::Sed,
        Self::Cls,
        Self::Rid,
        Self::Cps,
    ];

    /// Matches a request verb token.
    pub fn parse(token: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|verb| verb.as_str().as_bytes() == token)
    }

    /// Matches a response tag.
    pub fn from_reply_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|verb| verb.reply_tag() == tag)
    }

    /// Request token.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lin => "LIN",
            Self::Lou => "LOU",
            Self::Unr => "UNR",
            Self::Lme => "LME",
            Self::Lmr => "LMR",
            Self::Cre => "CRE",
            Self::Lst => "LST",
            Self::Sed => "SED",
            Self::Cls => "CLS",
            Self::Rid => "RID",
            Self::Cps => "CPS",
        }
    }

    /// Tag that prefixes replies to this verb.
    pub const fn reply_tag(self) -> &'static str {
        match self {
            Self::Lin => "RLI",
            Self::Lou => "RLO",
            Self::Unr => "RUR",
            Self::Lme => "RME",
            Self::Lmr => "RMR",
            Self::Cre => "RCE",
            Self::Lst => "RLS",
            Self::Sed => "RSE",
            Self::Cls => "RCL",
            Self::Rid => "RRI",
            Self::Cps => "RCP",
        }
    }

    /// Transport this verb is accepted on.
    pub const fn transport(self) -> Transport {
        match self {
            Self::Lin | Self::Lou | Self::Unr | Self::Lme | Self::Lmr => Transport::Datagram,
            Self::Cre | Self::Lst | Self::Sed | Self::Cls | Self::Rid | Self::Cps => {
                Transport::Stream
            },
        }
    }

    /// Number of text arguments after the verb.
    ///
    /// For `CRE` this counts the header tokens up to and including the
    /// payload size.
    pub const fn arity(self) -> usize {
        match self {
            Self::Lin | Self::Lou | Self::Unr | Self::Lme | Self::Lmr => 2,
            Self::Cre => 8,
            Self::Lst => 0,
            Self::Sed => 1,
            Self::Cls | Self::Cps => 3,
            Self::Rid => 4,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `LIN uid pass`
    Login {
        /// Account
        uid: AccountId,
        /// Password
        password: Password,
    },
    /// `LOU uid pass`
    Logout {
        /// Account
        uid: AccountId,
        /// Password
        password: Password,
    },
    /// `UNR uid pass`
    Unregister {
        /// Account
        uid: AccountId,
        /// Password
        password: Password,
    },
    /// `LME uid pass`
    MyEvents {
        /// Account
        uid: AccountId,
        /// Password
        password: Password,
    },
    /// `LMR uid pass`
    MyReservations {
        /// Account
        uid: AccountId,
        /// Password
        password: Password,
    },
    /// `CRE uid pass name date time capacity fname size <bytes>`
    Create {
        /// Owner
        uid: AccountId,
        /// Password
        password: Password,
        /// Event name
        name: EventName,
        /// Start date-time
        start: EventDate,
        /// Total seats
        capacity: Capacity,
        /// Description file name
        filename: Filename,
        /// Description file contents
        description: Bytes,
    },
    /// `LST`
    List,
    /// `SED eid`
    Show {
        /// Event
        eid: EventId,
    },
    /// `CLS uid pass eid`
    Close {
        /// Account
        uid: AccountId,
        /// Password
        password: Password,
        /// Event
        eid: EventId,
    },
    /// `RID uid pass eid seats`
    Reserve {
        /// Account
        uid: AccountId,
        /// Password
        password: Password,
        /// Event
        eid: EventId,
        /// Seats requested
        seats: SeatCount,
    },
    /// `CPS uid oldpass newpass`
    ChangePassword {
        /// Account
        uid: AccountId,
        /// Current password
        old: Password,
        /// Replacement password
        new: Password,
    },
}

fn checked<T>(verb: Verb, parsed: std::result::Result<T, FieldError>) -> Result<T> {
    parsed.map_err(|source| ProtocolError::field(verb, source))
}

fn credentials(verb: Verb, uid: &str, password: &str) -> Result<(AccountId, Password)> {
    Ok((checked(verb, AccountId::parse(uid))?, checked(verb, Password::parse(password))?))
}

/// Parses the declared payload size of `CRE`: at most 8 digits.
pub(crate) fn parse_payload_size(raw: &str) -> std::result::Result<u64, FieldError> {
    if raw.is_empty() || raw.len() > 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FieldError::new("size", "must be 1 to 8 digits"));
    }
    raw.parse().map_err(|_| FieldError::new("size", "not a number"))
}

impl Request {
    /// Verb of this request.
    pub fn verb(&self) -> Verb {
        match self {
            Self::Login { .. } => Verb::Lin,
            Self::Logout { .. } => Verb::Lou,
            Self::Unregister { .. } => Verb::Unr,
            Self::MyEvents { .. } => Verb::Lme,
            Self::MyReservations { .. } => Verb::Lmr,
            Self::Create { .. } => Verb::Cre,
            Self::List => Verb::Lst,
            Self::Show { .. } => Verb::Sed,
            Self::Close { .. } => Verb::Cls,
            Self::Reserve { .. } => Verb::Rid,
            Self::ChangePassword { .. } => Verb::Cps,
        }
    }

    /// Parses one request line without its terminator.
    ///
    /// A `CRE` line only parses on its own when it declares an empty payload.
    pub fn parse_line(line: &str) -> Result<Self> {
        let mut tokens = line.split_ascii_whitespace();
        let head = tokens.next().unwrap_or_default();
        let verb = Verb::parse(head.as_bytes())
            .ok_or_else(|| ProtocolError::UnknownVerb(head.to_owned()))?;
        let args: Vec<&str> = tokens.collect();

        if verb == Verb::Cre && args.len() == verb.arity() {
            let size = checked(verb, parse_payload_size(args[7]))?;
            if size != 0 {
                return Err(ProtocolError::Truncated {
                    verb,
                    expected: size as usize,
                    received: 0,
                });
            }
        }
        Self::from_args(verb, &args, Bytes::new())
    }

    /// Builds a request from its verb, text arguments and payload.
    ///
    /// Checks arity first, then each field left to right. `payload` is only
    /// read for `CRE` and must match the declared size.
    pub(crate) fn from_args(verb: Verb, args: &[&str], payload: Bytes) -> Result<Self> {
        let expected = verb.arity();
        if args.len() != expected {
            return Err(ProtocolError::ArgumentCount { verb, expected, got: args.len() });
        }

        let request = match verb {
            Verb::Lin | Verb::Lou | Verb::Unr | Verb::Lme | Verb::Lmr => {
                let (uid, password) = credentials(verb, args[0], args[1])?;
                match verb {
                    Verb::Lin => Self::Login { uid, password },
                    Verb::Lou => Self::Logout { uid, password },
                    Verb::Unr => Self::Unregister { uid, password },
                    Verb::Lme => Self::MyEvents { uid, password },
                    _ => Self::MyReservations { uid, password },
                }
            },
            Verb::Cre => {
                let (uid, password) = credentials(verb, args[0], args[1])?;
                let name = checked(verb, EventName::parse(args[2]))?;
                let start = checked(verb, EventDate::parse(args[3], args[4]))?;
                let capacity = checked(verb, Capacity::parse(args[5]))?;
                let filename = checked(verb, Filename::parse(args[6]))?;
                let size = checked(verb, parse_payload_size(args[7]))?;
                if size != payload.len() as u64 {
                    return Err(ProtocolError::Truncated {
                        verb,
                        expected: size as usize,
                        received: payload.len(),
                    });
                }
                Self::Create { uid, password, name, start, capacity, filename, description: payload }
            },
            Verb::Lst => Self::List,
            Verb::Sed => Self::Show { eid: checked(verb, EventId::parse(args[0]))? },
            Verb::Cls => {
                let (uid, password) = credentials(verb, args[0], args[1])?;
                let eid = checked(verb, EventId::parse(args[2]))?;
                Self::Close { uid, password, eid }
            },
            Verb::Rid => {
                let (uid, password) = credentials(verb, args[0], args[1])?;
                let eid = checked(verb, EventId::parse(args[2]))?;
                let seats = checked(verb, SeatCount::parse(args[3]))?;
                Self::Reserve { uid, password, eid, seats }
            },
            Verb::Cps => {
                let uid = checked(verb, AccountId::parse(args[0]))?;
                let old = checked(verb, Password::parse(args[1]))?;
                let new = checked(verb, Password::parse(args[2]))?;
                Self::ChangePassword { uid, old, new }
            },
        };
        Ok(request)
    }

    fn header(&self) -> String {
        let verb = self.verb();
        match self {
            Self::Login { uid, password }
            | Self::Logout { uid, password }
            | Self::Unregister { uid, password }
            | Self::MyEvents { uid, password }
            | Self::MyReservations { uid, password } => format!("{verb} {uid} {password}"),
            Self::Create { uid, password, name, start, capacity, filename, description } => {
                let size = description.len();
                format!("{verb} {uid} {password} {name} {start} {capacity} {filename} {size}")
            },
            Self::List => verb.to_string(),
            Self::Show { eid } => format!("{verb} {eid}"),
            Self::Close { uid, password, eid } => format!("{verb} {uid} {password} {eid}"),
            Self::Reserve { uid, password, eid, seats } => {
                format!("{verb} {uid} {password} {eid} {seats}")
            },
            Self::ChangePassword { uid, old, new } => format!("{verb} {uid} {old} {new}"),
        }
    }

    /// Writes the wire form.
    ///
    /// Line requests end with `\n`. `CRE` ends with its raw payload and no
    /// terminator.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(self.header().as_bytes());
        if let Self::Create { description, .. } = self {
            dst.put_u8(b' ');
            dst.put_slice(description);
        } else {
            dst.put_u8(b'\n');
        }
    }

    /// Wire form as an owned buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}
