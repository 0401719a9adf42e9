//! Typed request fields.
//!
//! Each field checks its wire format when constructed, so holding one of these
//! values means it is safe to persist and to echo back on the wire. The
//! string-backed fields round-trip through serde as their wire text.

use std::{fmt, str::FromStr};

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A field that failed format validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct FieldError {
    /// Field name as it appears in the grammar
    pub field: &'static str,
    /// Human readable reason
    pub reason: String,
}

impl FieldError {
    /// Creates a field error.
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self { field, reason: reason.into() }
    }
}

macro_rules! text_field {
    ($(#[$meta:meta])* $name:ident, $label:literal, $check:path) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validates `raw` and wraps it.
            pub fn parse(raw: &str) -> Result<Self, FieldError> {
                $check(raw).map_err(|reason| FieldError::new($label, reason))?;
                Ok(Self(raw.to_owned()))
            }

            /// Wire form.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = FieldError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                Self::parse(raw)
            }
        }

        impl TryFrom<String> for $name {
            type Error = FieldError;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                $check(&raw).map_err(|reason| FieldError::new($label, reason))?;
                Ok(Self(raw))
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

text_field!(
    /// Account identifier: exactly 6 decimal digits.
    #[derive(Debug)]
    AccountId,
    "account id",
    check_account_id
);

text_field!(
    /// Account password: exactly 8 ASCII alphanumerics.
    ///
    /// `Debug` output is redacted.
    Password,
    "password",
    check_password
);

text_field!(
    /// Event name: 1 to 10 ASCII alphanumerics.
    #[derive(Debug)]
    EventName,
    "event name",
    check_event_name
);

text_field!(
    /// Description file name: 1 to 24 characters from `[A-Za-z0-9._-]`.
    ///
    /// `.` and `..` are refused since the name becomes a path component.
    #[derive(Debug)]
    Filename,
    "file name",
    check_filename
);

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(********)")
    }
}

fn check_account_id(raw: &str) -> Result<(), &'static str> {
    if raw.len() == 6 && raw.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err("must be exactly 6 digits")
    }
}

fn check_password(raw: &str) -> Result<(), &'static str> {
    if raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err("must be exactly 8 alphanumeric characters")
    }
}

fn check_event_name(raw: &str) -> Result<(), &'static str> {
    if (1..=10).contains(&raw.len()) && raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err("must be 1 to 10 alphanumeric characters")
    }
}

fn check_filename(raw: &str) -> Result<(), &'static str> {
    if !(1..=24).contains(&raw.len()) {
        return Err("must be 1 to 24 characters");
    }
    if !raw.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.')) {
        return Err("may only contain alphanumerics, '-', '_' and '.'");
    }
    if raw == "." || raw == ".." {
        return Err("must name a file");
    }
    Ok(())
}

/// Parses an unsigned decimal of at most `max_digits` digits.
fn parse_decimal(raw: &str, field: &'static str, max_digits: usize) -> Result<u32, FieldError> {
    if raw.is_empty() || raw.len() > max_digits || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FieldError::new(field, format!("must be 1 to {max_digits} digits")));
    }
    raw.parse().map_err(|_| FieldError::new(field, "not a number"))
}

/// Event identifier in `1..=999`, rendered as 3 zero-padded digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct EventId(u16);

impl EventId {
    /// First id handed out.
    pub const FIRST: Self = Self(1);

    /// Last id in the id space.
    pub const LAST: Self = Self(999);

    /// Wraps `value` if it is inside the id space.
    pub fn new(value: u16) -> Option<Self> {
        (Self::FIRST.0..=Self::LAST.0).contains(&value).then_some(Self(value))
    }

    /// Parses the 3-digit wire form.
    pub fn parse(raw: &str) -> Result<Self, FieldError> {
        if raw.len() != 3 {
            return Err(FieldError::new("event id", "must be exactly 3 digits"));
        }
        let value = parse_decimal(raw, "event id", 3)?;
        Self::new(value as u16).ok_or_else(|| FieldError::new("event id", "must be 001 to 999"))
    }

    /// Numeric value.
    pub const fn get(self) -> u16 {
        self.0
    }

    /// The following id, or `None` once the id space is used up.
    pub fn next(self) -> Option<Self> {
        Self::new(self.0 + 1)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

impl FromStr for EventId {
    type Err = FieldError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl TryFrom<u16> for EventId {
    type Error = FieldError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| FieldError::new("event id", "must be 001 to 999"))
    }
}

impl From<EventId> for u16 {
    fn from(value: EventId) -> Self {
        value.0
    }
}

/// Total seats of an event, `10..=999`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Capacity(u16);

impl Capacity {
    /// Smallest capacity an event may have.
    pub const MIN: u16 = 10;

    /// Largest capacity an event may have.
    pub const MAX: u16 = 999;

    /// Wraps `value` if it is in range.
    pub fn new(value: u16) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    /// Parses the decimal wire form.
    pub fn parse(raw: &str) -> Result<Self, FieldError> {
        let value = parse_decimal(raw, "capacity", 3)?;
        Self::new(value as u16).ok_or_else(|| FieldError::new("capacity", "must be 10 to 999"))
    }

    /// Numeric value.
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for Capacity {
    type Error = FieldError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| FieldError::new("capacity", "must be 10 to 999"))
    }
}

impl From<Capacity> for u16 {
    fn from(value: Capacity) -> Self {
        value.0
    }
}

/// Seats requested by one reservation, `1..=999`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct SeatCount(u16);

impl SeatCount {
    /// Largest reservation.
    pub const MAX: u16 = 999;

    /// Wraps `value` if it is in range.
    pub fn new(value: u16) -> Option<Self> {
        (1..=Self::MAX).contains(&value).then_some(Self(value))
    }

    /// Parses the decimal wire form.
    pub fn parse(raw: &str) -> Result<Self, FieldError> {
        let value = parse_decimal(raw, "seat count", 3)?;
        Self::new(value as u16).ok_or_else(|| FieldError::new("seat count", "must be 1 to 999"))
    }

    /// Numeric value.
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for SeatCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for SeatCount {
    type Error = FieldError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| FieldError::new("seat count", "must be 1 to 999"))
    }
}

impl From<SeatCount> for u16 {
    fn from(value: SeatCount) -> Self {
        value.0
    }
}

/// Parses `dd-mm-yyyy`, checking the calendar.
fn parse_calendar_date(raw: &str, field: &'static str) -> Result<NaiveDate, FieldError> {
    let bytes = raw.as_bytes();
    if bytes.len() != 10 || bytes[2] != b'-' || bytes[5] != b'-' {
        return Err(FieldError::new(field, "date must be dd-mm-yyyy"));
    }
    let day = parse_decimal(&raw[0..2], field, 2)?;
    let month = parse_decimal(&raw[3..5], field, 2)?;
    let year = parse_decimal(&raw[6..10], field, 4)?;
    if year < 1900 {
        return Err(FieldError::new(field, "year must be 1900 or later"));
    }
    NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or_else(|| FieldError::new(field, format!("{raw} is not a calendar date")))
}

/// Parses `hh:mm` or, with `seconds`, `hh:mm:ss`.
fn parse_clock(raw: &str, field: &'static str, seconds: bool) -> Result<NaiveTime, FieldError> {
    let bytes = raw.as_bytes();
    let shape_ok = if seconds {
        bytes.len() == 8 && bytes[2] == b':' && bytes[5] == b':'
    } else {
        bytes.len() == 5 && bytes[2] == b':'
    };
    if !shape_ok {
        let expected = if seconds { "hh:mm:ss" } else { "hh:mm" };
        return Err(FieldError::new(field, format!("time must be {expected}")));
    }
    let hour = parse_decimal(&raw[0..2], field, 2)?;
    let minute = parse_decimal(&raw[3..5], field, 2)?;
    let second = if seconds { parse_decimal(&raw[6..8], field, 2)? } else { 0 };
    NaiveTime::from_hms_opt(hour, minute, second)
        .ok_or_else(|| FieldError::new(field, format!("{raw} is not a time of day")))
}

fn write_date(f: &mut fmt::Formatter<'_>, at: &NaiveDateTime) -> fmt::Result {
    write!(f, "{:02}-{:02}-{:04}", at.day(), at.month(), at.year())
}

/// Event start, minute precision, wire form `dd-mm-yyyy hh:mm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventDate(NaiveDateTime);

impl EventDate {
    /// Parses the two wire tokens.
    pub fn parse(date: &str, time: &str) -> Result<Self, FieldError> {
        let day = parse_calendar_date(date, "event date")?;
        let clock = parse_clock(time, "event date", false)?;
        Ok(Self(day.and_time(clock)))
    }

    /// Truncates `at` to whole minutes.
    pub fn from_datetime(at: NaiveDateTime) -> Self {
        let clock = NaiveTime::from_hms_opt(at.hour(), at.minute(), 0).unwrap_or(at.time());
        Self(at.date().and_time(clock))
    }

    /// The wrapped wall-clock value.
    pub const fn as_datetime(&self) -> NaiveDateTime {
        self.0
    }
}

impl fmt::Display for EventDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_date(f, &self.0)?;
        write!(f, " {:02}:{:02}", self.0.hour(), self.0.minute())
    }
}

impl FromStr for EventDate {
    type Err = FieldError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (date, time) = raw
            .split_once(' ')
            .ok_or_else(|| FieldError::new("event date", "expected dd-mm-yyyy hh:mm"))?;
        Self::parse(date, time)
    }
}

impl TryFrom<String> for EventDate {
    type Error = FieldError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<EventDate> for String {
    fn from(value: EventDate) -> Self {
        value.to_string()
    }
}

/// Reservation instant, second precision, wire form `dd-mm-yyyy hh:mm:ss`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    /// Parses the two wire tokens.
    pub fn parse(date: &str, time: &str) -> Result<Self, FieldError> {
        let day = parse_calendar_date(date, "timestamp")?;
        let clock = parse_clock(time, "timestamp", true)?;
        Ok(Self(day.and_time(clock)))
    }

    /// Truncates `at` to whole seconds.
    pub fn from_datetime(at: NaiveDateTime) -> Self {
        Self(at.with_nanosecond(0).unwrap_or(at))
    }

    /// The wrapped wall-clock value.
    pub const fn as_datetime(&self) -> NaiveDateTime {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_date(f, &self.0)?;
        write!(f, " {:02}:{:02}:{:02}", self.0.hour(), self.0.minute(), self.0.second())
    }
}

impl FromStr for Timestamp {
    type Err = FieldError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (date, time) = raw
            .split_once(' ')
            .ok_or_else(|| FieldError::new("timestamp", "expected dd-mm-yyyy hh:mm:ss"))?;
        Self::parse(date, time)
    }
}

impl TryFrom<String> for Timestamp {
    type Error = FieldError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<Timestamp> for String {
    fn from(value: Timestamp) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn account_id_requires_six_digits() {
        assert!(AccountId::parse("123456").is_ok());
        assert!(AccountId::parse("12345").is_err());
        assert!(AccountId::parse("1234567").is_err());
        assert!(AccountId::parse("12345a").is_err());
    }

    #[test]
    fn password_requires_eight_alphanumerics() {
        assert!(Password::parse("pass1234").is_ok());
        assert!(Password::parse("pass123").is_err());
        assert!(Password::parse("pass-234").is_err());
        assert_eq!(format!("{:?}", Password::parse("pass1234").unwrap()), "Password(********)");
    }

    #[test]
    fn filename_rejects_path_tricks() {
        assert!(Filename::parse("desc.txt").is_ok());
        assert!(Filename::parse("a_b-c.d").is_ok());
        assert!(Filename::parse("..").is_err());
        assert!(Filename::parse("a/b").is_err());
        assert!(Filename::parse("abcdefghijklmnopqrstuvwxy").is_err());
    }

    #[test]
    fn event_id_is_three_padded_digits() {
        let eid = EventId::parse("007").unwrap();
        assert_eq!(eid.get(), 7);
        assert_eq!(eid.to_string(), "007");
        assert!(EventId::parse("7").is_err());
        assert!(EventId::parse("000").is_err());
        assert_eq!(EventId::LAST.next(), None);
    }

    #[test]
    fn capacity_bounds() {
        assert!(Capacity::parse("9").is_err());
        assert!(Capacity::parse("10").is_ok());
        assert!(Capacity::parse("999").is_ok());
        assert!(Capacity::parse("1000").is_err());
        assert!(Capacity::parse("+10").is_err());
    }

    #[test]
    fn seat_count_bounds() {
        assert!(SeatCount::parse("0").is_err());
        assert!(SeatCount::parse("1").is_ok());
        assert!(SeatCount::parse("999").is_ok());
    }

    #[test]
    fn event_date_checks_calendar() {
        let date = EventDate::parse("29-02-2028", "23:59").unwrap();
        assert_eq!(date.to_string(), "29-02-2028 23:59");
        assert!(EventDate::parse("29-02-2027", "10:00").is_err());
        assert!(EventDate::parse("31-04-2030", "10:00").is_err());
        assert!(EventDate::parse("01-01-2030", "24:00").is_err());
        assert!(EventDate::parse("1-1-2030", "10:00").is_err());
    }

    #[test]
    fn timestamp_text_roundtrip() {
        let ts: Timestamp = "05-11-2026 08:09:10".parse().unwrap();
        assert_eq!(ts.to_string(), "05-11-2026 08:09:10");
    }

    #[test]
    fn stored_text_is_revalidated() {
        assert!(AccountId::try_from(String::from("abc")).is_err());
        assert!(EventId::try_from(1000u16).is_err());
        assert!(EventDate::try_from(String::from("01-01-2030 10:00")).is_ok());
    }
}
