//! Fuzz target for request framing
//!
//! Feeds arbitrary bytes to both decoders. Stream input is delivered in
//! arbitrary chunks to mimic partial TCP reads.
//!
//! # Strategy
//!
//! - Raw bytes straight into `decode_datagram`
//! - The same bytes into `StreamDecoder`, split at fuzzer-chosen offsets
//! - Small header and payload limits so the limit paths are reachable
//!
//! # Invariants
//!
//! - Neither decoder EVER panics
//! - Chunking does not change the outcome: a split delivery yields the same
//!   request as a single delivery
//! - Every decoded request re-encodes to bytes that decode to itself
//! - Errors that carry a reply verb name a verb of the matching transport

#![no_main]

use arbitrary::Arbitrary;
use boxoffice_proto::{
    DecoderLimits, ProtocolError, Request, StreamDecoder, Transport, decode_datagram,
};
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct DecodeInput {
    data: Vec<u8>,
    /// Chunk lengths for the split delivery, cycled until the data runs out
    chunks: Vec<u8>,
    max_header_bytes: u16,
    max_payload_bytes: u16,
}

/// Decodes `data` delivered in one piece.
fn decode_whole(limits: DecoderLimits, data: &[u8]) -> Result<Option<Request>, ProtocolError> {
    let mut decoder = StreamDecoder::new(limits);
    let mut buf = BytesMut::from(data);
    decoder.decode_eof(&mut buf)
}

/// Decodes `data` delivered in chunks, as a socket would hand it over.
fn decode_split(
    limits: DecoderLimits,
    data: &[u8],
    chunks: &[u8],
) -> Result<Option<Request>, ProtocolError> {
    let mut decoder = StreamDecoder::new(limits);
    let mut buf = BytesMut::new();
    let mut offset = 0;
    let mut sizes = chunks.iter().map(|c| usize::from(*c).max(1)).cycle();

    while offset < data.len() {
        let size = if chunks.is_empty() { data.len() } else { sizes.next().unwrap_or(1) };
        let end = (offset + size).min(data.len());
        buf.extend_from_slice(&data[offset..end]);
        offset = end;

        if let Some(request) = decoder.decode(&mut buf)? {
            return Ok(Some(request));
        }
    }
    decoder.decode_eof(&mut buf)
}

fuzz_target!(|input: DecodeInput| {
    // Datagram path
    match decode_datagram(&input.data) {
        Ok(request) => {
            assert_eq!(request.verb().transport(), Transport::Datagram);
            assert_eq!(decode_datagram(&request.to_bytes()).as_ref(), Ok(&request));
        },
        Err(err) => {
            if let Some(verb) = err.reply_verb() {
                assert_eq!(verb.transport(), Transport::Datagram);
            }
        },
    }

    // Stream path
    let limits = DecoderLimits {
        max_header_bytes: usize::from(input.max_header_bytes).max(64),
        max_payload_bytes: u64::from(input.max_payload_bytes),
    };
    let whole = decode_whole(limits, &input.data);
    let split = decode_split(limits, &input.data, &input.chunks);

    match (&whole, &split) {
        (Ok(a), Ok(b)) => assert_eq!(a, b, "chunking changed the decoded request"),
        (Err(_), Err(_)) => {},
        _ => panic!("chunking changed the outcome: {whole:?} vs {split:?}"),
    }

    if let Ok(Some(request)) = whole {
        assert_eq!(request.verb().transport(), Transport::Stream);
        let reencoded = decode_whole(DecoderLimits::default(), &request.to_bytes());
        assert_eq!(reencoded, Ok(Some(request)));
    }
});
