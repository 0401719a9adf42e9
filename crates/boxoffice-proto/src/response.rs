//! Response grammar.
//!
//! Every reply starts with the verb's reply tag and a status token. Single
//! record replies end with `\n`. `RLS` puts one event per line and ends with
//! an empty line. `RSE` carries the description file as a raw tail.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    AccountId, Capacity, EventDate, EventId, EventName, EventState, Filename, SeatCount, Timestamp,
    Verb,
    codec::{Scan, scan_tokens},
    errors::{ProtocolError, Result},
    request::parse_payload_size,
};

/// Status token of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Success
    Ok,
    /// Generic failure
    Nok,
    /// Account was registered
    Reg,
    /// Account is unknown
    Unr,
    /// Wrong password
    Wrp,
    /// Account is not logged in
    Nlg,
    /// Malformed request
    Err,
    /// Event does not exist
    Noe,
    /// Event is owned by another account
    Eow,
    /// Event was already closed
    Clo,
    /// Event start has passed
    Pst,
    /// Event is sold out
    Sld,
    /// Event is closed (reservation reply)
    Cls,
    /// Reservation accepted
    Acc,
    /// Account id unknown (password change reply)
    Nid,
}

impl Status {
    const ALL: [Self; 15] = [
        Self::Ok,
        Self::Nok,
        Self::Reg,
        Self::Unr,
        Self::Wrp,
        Self::Nlg,
        Self::Err,
        Self::Noe,
        Self::Eow,
        Self::Clo,
        Self::Pst,
        Self::Sld,
        Self::Cls,
        Self::Acc,
        Self::Nid,
    ];

    /// Wire token.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Nok => "NOK",
            Self::Reg => "REG",
            Self::Unr => "UNR",
            Self::Wrp => "WRP",
            Self::Nlg => "NLG",
            Self::Err => "ERR",
            Self::Noe => "NOE",
            Self::Eow => "EOW",
            Self::Clo => "CLO",
            Self::Pst => "PST",
            Self::Sld => "SLD",
            Self::Cls => "CLS",
            Self::Acc => "ACC",
            Self::Nid => "NID",
        }
    }

    /// Matches a wire token.
    pub fn parse(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == token)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an `RMR` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationSummary {
    /// Event reserved
    pub eid: EventId,
    /// When the reservation was accepted
    pub reserved_at: Timestamp,
    /// Seats reserved
    pub seats: SeatCount,
}

/// One line of an `RLS` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSummary {
    /// Event
    pub eid: EventId,
    /// Event name
    pub name: EventName,
    /// State at the time of listing
    pub state: EventState,
    /// Start date-time
    pub start: EventDate,
}

/// Body of an `RSE OK` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDetails {
    /// Owner account
    pub owner: AccountId,
    /// Event name
    pub name: EventName,
    /// Start date-time
    pub start: EventDate,
    /// Total seats
    pub capacity: Capacity,
    /// Seats reserved so far
    pub reserved: u16,
    /// Description file name
    pub filename: Filename,
    /// Description file contents
    pub description: Bytes,
}

/// A reply, typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Untagged `ERR`: unknown verb or wrong transport
    Error,
    /// `<TAG> <STATUS>` with no body
    Status {
        /// Verb being answered
        verb: Verb,
        /// Outcome
        status: Status,
    },
    /// `RCE OK eid`
    Created {
        /// Allocated id
        eid: EventId,
    },
    /// `RME OK (eid state)*`
    MyEvents(Vec<(EventId, EventState)>),
    /// `RMR OK (eid date time seats)*`
    MyReservations(Vec<ReservationSummary>),
    /// `RLS OK` followed by one event per line
    EventList(Vec<EventSummary>),
    /// `RSE OK ... <bytes>`
    EventDetails(EventDetails),
    /// `RRI REJ available`
    Rejected {
        /// Seats still free
        available: u16,
    },
}

impl Response {
    /// Shorthand for a bodiless reply.
    pub fn status(verb: Verb, status: Status) -> Self {
        Self::Status { verb, status }
    }

    /// Writes the wire form.
    pub fn encode(&self, dst: &mut impl BufMut) {
        match self {
            Self::Error => dst.put_slice(b"ERR\n"),
            Self::Status { verb, status } => {
                dst.put_slice(format!("{} {status}\n", verb.reply_tag()).as_bytes());
            },
            Self::Created { eid } => dst.put_slice(format!("RCE OK {eid}\n").as_bytes()),
            Self::MyEvents(events) => {
                dst.put_slice(b"RME OK");
                for (eid, state) in events {
                    dst.put_slice(format!(" {eid} {}", state.code()).as_bytes());
                }
                dst.put_u8(b'\n');
            },
            Self::MyReservations(reservations) => {
                dst.put_slice(b"RMR OK");
                for r in reservations {
                    dst.put_slice(format!(" {} {} {}", r.eid, r.reserved_at, r.seats).as_bytes());
                }
                dst.put_u8(b'\n');
            },
            Self::EventList(events) => {
                dst.put_slice(b"RLS OK ");
                for e in events {
                    let line = format!("{} {} {} {}\n", e.eid, e.name, e.state.code(), e.start);
                    dst.put_slice(line.as_bytes());
                }
                dst.put_u8(b'\n');
            },
            Self::EventDetails(d) => {
                let header = format!(
                    "RSE OK {} {} {} {} {} {} {} ",
                    d.owner,
                    d.name,
                    d.start,
                    d.capacity,
                    d.reserved,
                    d.filename,
                    d.description.len()
                );
                dst.put_slice(header.as_bytes());
                dst.put_slice(&d.description);
                dst.put_u8(b'\n');
            },
            Self::Rejected { available } => {
                dst.put_slice(format!("RRI REJ {available}\n").as_bytes());
            },
        }
    }

    /// Wire form as an owned buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decodes a complete reply to `verb`.
    pub fn decode(verb: Verb, bytes: &[u8]) -> Result<Self> {
        let tag = verb.reply_tag();
        if bytes == b"ERR\n" || bytes == b"ERR" {
            return Ok(Self::Error);
        }
        if verb == Verb::Sed && bytes.starts_with(b"RSE OK ") {
            return decode_details(bytes);
        }

        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
        let mut lines = text.split('\n');
        let first = lines.next().unwrap_or_default();
        let tokens: Vec<&str> = first.split_ascii_whitespace().collect();
        if tokens.first() != Some(&tag) {
            return Err(ProtocolError::malformed(tag, "unexpected reply tag"));
        }
        let status = *tokens.get(1).ok_or_else(|| ProtocolError::malformed(tag, "no status"))?;
        let body = &tokens[2..];

        match (verb, status) {
            (Verb::Rid, "REJ") => {
                let [available] = body else {
                    return Err(ProtocolError::malformed(tag, "REJ takes one count"));
                };
                let available =
                    available.parse().map_err(|_| ProtocolError::malformed(tag, "bad count"))?;
                Ok(Self::Rejected { available })
            },
            (Verb::Cre, "OK") => {
                let [eid] = body else {
                    return Err(ProtocolError::malformed(tag, "OK takes one event id"));
                };
                Ok(Self::Created { eid: parse_field(tag, EventId::parse(eid))? })
            },
            (Verb::Lme, "OK") => {
                if body.len() % 2 != 0 {
                    return Err(ProtocolError::malformed(tag, "odd number of tokens"));
                }
                body.chunks(2)
                    .map(|pair| {
                        let eid = parse_field(tag, EventId::parse(pair[0]))?;
                        let state = EventState::parse(pair[1])
                            .ok_or_else(|| ProtocolError::malformed(tag, "bad state code"))?;
                        Ok((eid, state))
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(Self::MyEvents)
            },
            (Verb::Lmr, "OK") => {
                if body.len() % 4 != 0 {
                    return Err(ProtocolError::malformed(tag, "records are 4 tokens"));
                }
                body.chunks(4)
                    .map(|r| {
                        Ok(ReservationSummary {
                            eid: parse_field(tag, EventId::parse(r[0]))?,
                            reserved_at: parse_field(tag, Timestamp::parse(r[1], r[2]))?,
                            seats: parse_field(tag, SeatCount::parse(r[3]))?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(Self::MyReservations)
            },
            (Verb::Lst, "OK") => {
                let mut events = vec![parse_summary(tag, body)?];
                for line in lines {
                    if line.is_empty() {
                        break;
                    }
                    let record: Vec<&str> = line.split_ascii_whitespace().collect();
                    events.push(parse_summary(tag, &record)?);
                }
                Ok(Self::EventList(events))
            },
            (_, token) => {
                let status = Status::parse(token)
                    .ok_or_else(|| ProtocolError::malformed(tag, format!("unknown status {token}")))?;
                Ok(Self::Status { verb, status })
            },
        }
    }
}

fn parse_field<T>(tag: &'static str, parsed: std::result::Result<T, crate::FieldError>) -> Result<T> {
    parsed.map_err(|e| ProtocolError::malformed(tag, e.to_string()))
}

fn parse_summary(tag: &'static str, record: &[&str]) -> Result<EventSummary> {
    let [eid, name, state, date, time] = record else {
        return Err(ProtocolError::malformed(tag, "event records are 5 tokens"));
    };
    Ok(EventSummary {
        eid: parse_field(tag, EventId::parse(eid))?,
        name: parse_field(tag, EventName::parse(name))?,
        state: EventState::parse(state)
            .ok_or_else(|| ProtocolError::malformed(tag, "bad state code"))?,
        start: parse_field(tag, EventDate::parse(date, time))?,
    })
}

fn decode_details(bytes: &[u8]) -> Result<Response> {
    const TAG: &str = "RSE";
    let Scan::Complete { spans, end } = scan_tokens(bytes, 10) else {
        return Err(ProtocolError::malformed(TAG, "header is incomplete"));
    };
    let token = |i: usize| header_token(bytes, &spans, i);

    let size = parse_field(TAG, parse_payload_size(token(9)?))? as usize;
    let description = bytes
        .get(end..end + size)
        .ok_or_else(|| ProtocolError::malformed(TAG, "description is truncated"))?;

    Ok(Response::EventDetails(EventDetails {
        owner: parse_field(TAG, AccountId::parse(token(2)?))?,
        name: parse_field(TAG, EventName::parse(token(3)?))?,
        start: parse_field(TAG, EventDate::parse(token(4)?, token(5)?))?,
        capacity: parse_field(TAG, Capacity::parse(token(6)?))?,
        reserved: token(7)?.parse().map_err(|_| ProtocolError::malformed(TAG, "bad count"))?,
        filename: parse_field(TAG, Filename::parse(token(8)?))?,
        description: Bytes::copy_from_slice(description),
    }))
}

fn header_token<'a>(bytes: &'a [u8], spans: &[(usize, usize)], index: usize) -> Result<&'a str> {
    let (start, stop) = spans[index];
    std::str::from_utf8(&bytes[start..stop]).map_err(|_| ProtocolError::NotUtf8)
}
