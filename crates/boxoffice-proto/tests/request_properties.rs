//! Property-based tests for request framing.
//!
//! A stream request must decode to the same value however its bytes are
//! split across reads, and malformed credentials must always be rejected as
//! format errors of the verb that carried them.

use boxoffice_proto::{
    AccountId, Capacity, EventDate, EventId, EventName, Filename, Password, ProtocolError, Request,
    SeatCount, StreamDecoder, Verb, decode_datagram,
};
use bytes::{Bytes, BytesMut};
use proptest::prelude::*;

fn arbitrary_uid() -> impl Strategy<Value = AccountId> {
    "[0-9]{6}".prop_map(|s| AccountId::parse(&s).unwrap())
}

fn arbitrary_password() -> impl Strategy<Value = Password> {
    "[A-Za-z0-9]{8}".prop_map(|s| Password::parse(&s).unwrap())
}

fn arbitrary_eid() -> impl Strategy<Value = EventId> {
    (1u16..=999).prop_map(|v| EventId::new(v).unwrap())
}

/// Stream requests, `CRE` included with an arbitrary binary payload.
fn arbitrary_stream_request() -> impl Strategy<Value = Request> {
    let create = (
        arbitrary_uid(),
        arbitrary_password(),
        "[A-Za-z0-9]{1,10}",
        (1u32..=28, 1u32..=12, 2000i32..2100, 0u32..24, 0u32..60),
        10u16..=999,
        "[A-Za-z0-9_.-]{1,24}",
        prop::collection::vec(any::<u8>(), 0..2048),
    )
        .prop_filter("dot names are not file names", |t| t.5 != "." && t.5 != "..")
        .prop_map(|(uid, password, name, (d, m, y, hh, mm), cap, fname, payload)| {
            let date = format!("{d:02}-{m:02}-{y:04}");
            let time = format!("{hh:02}:{mm:02}");
            Request::Create {
                uid,
                password,
                name: EventName::parse(&name).unwrap(),
                start: EventDate::parse(&date, &time).unwrap(),
                capacity: Capacity::new(cap).unwrap(),
                filename: Filename::parse(&fname).unwrap(),
                description: Bytes::from(payload),
            }
        });

    prop_oneof![
        create,
        Just(Request::List),
        arbitrary_eid().prop_map(|eid| Request::Show { eid }),
        (arbitrary_uid(), arbitrary_password(), arbitrary_eid())
            .prop_map(|(uid, password, eid)| Request::Close { uid, password, eid }),
        (arbitrary_uid(), arbitrary_password(), arbitrary_eid(), 1u16..=999).prop_map(
            |(uid, password, eid, seats)| Request::Reserve {
                uid,
                password,
                eid,
                seats: SeatCount::new(seats).unwrap(),
            }
        ),
        (arbitrary_uid(), arbitrary_password(), arbitrary_password())
            .prop_map(|(uid, old, new)| Request::ChangePassword { uid, old, new }),
    ]
}

fn decode_in_chunks(bytes: &[u8], cuts: &[usize]) -> Result<Option<Request>, ProtocolError> {
    let mut decoder = StreamDecoder::default();
    let mut buf = BytesMut::new();
    let mut offset = 0;
    for &cut in cuts {
        let cut = cut.clamp(offset, bytes.len());
        buf.extend_from_slice(&bytes[offset..cut]);
        offset = cut;
        if let Some(request) = decoder.decode(&mut buf)? {
            return Ok(Some(request));
        }
    }
    buf.extend_from_slice(&bytes[offset..]);
    if let Some(request) = decoder.decode(&mut buf)? {
        return Ok(Some(request));
    }
    decoder.decode_eof(&mut buf)
}

#[test]
fn prop_stream_decoding_ignores_read_boundaries() {
    proptest!(|(
        request in arbitrary_stream_request(),
        mut cuts in prop::collection::vec(0usize..4096, 0..8),
    )| {
        cuts.sort_unstable();
        let bytes = request.to_bytes();
        let decoded = decode_in_chunks(&bytes, &cuts).unwrap();

        // PROPERTY: framing is independent of how the bytes arrive
        prop_assert_eq!(decoded, Some(request));
    });
}

#[test]
fn prop_malformed_uid_is_a_format_error() {
    proptest!(|(uid in "[0-9a-z]{1,9}", password in arbitrary_password())| {
        prop_assume!(AccountId::parse(&uid).is_err());
        let line = format!("LIN {uid} {password}\n");
        let err = decode_datagram(line.as_bytes()).unwrap_err();

        // PROPERTY: the reply is tagged with the verb, never generic
        prop_assert_eq!(err.reply_verb(), Some(Verb::Lin));
        let is_field_error = matches!(err, ProtocolError::InvalidField { .. });
        prop_assert!(is_field_error);
    });
}

#[test]
fn prop_malformed_password_is_a_format_error() {
    proptest!(|(uid in arbitrary_uid(), password in "[A-Za-z0-9!-]{0,12}")| {
        prop_assume!(Password::parse(&password).is_err() && !password.is_empty());
        let line = format!("RID {uid} {password} 001 1\n");
        let mut decoder = StreamDecoder::default();
        let mut buf = BytesMut::from(line.as_bytes());
        let err = decoder.decode(&mut buf).unwrap_err();

        prop_assert_eq!(err.reply_verb(), Some(Verb::Rid));
    });
}
