//! Request framing for both transports.
//!
//! A datagram always holds exactly one request. Stream connections carry one
//! request too, but its bytes may arrive split over any number of reads, and
//! `CRE` appends a binary payload whose length is only known once the header
//! has been read. [`StreamDecoder`] is a small state machine over a
//! [`BytesMut`] buffer: it returns `Ok(None)` until a whole request is
//! buffered, and fails closed on oversized headers or payloads.

use bytes::{Buf, Bytes, BytesMut};

use crate::{
    DEFAULT_MAX_DESCRIPTION_BYTES, MAX_HEADER_BYTES, Request, Transport, Verb,
    errors::{ProtocolError, Result},
    request::parse_payload_size,
};

/// Outcome of scanning for space separated header tokens.
pub(crate) enum Scan {
    /// `count` tokens found; `end` is one past the delimiter after the last.
    Complete { spans: Vec<(usize, usize)>, end: usize },
    /// A newline arrived first; `end` is one past it.
    LineEnded { tokens: usize, end: usize },
    /// Need more bytes.
    Incomplete,
}

/// Finds the first `count` tokens of `buf`.
///
/// Tokens are separated by runs of spaces. The token is ended by the first
/// space or newline after it, and that single delimiter byte is consumed.
pub(crate) fn scan_tokens(buf: &[u8], count: usize) -> Scan {
    let mut spans = Vec::with_capacity(count);
    let mut start = None;
    for (i, &byte) in buf.iter().enumerate() {
        if byte == b' ' || byte == b'\n' {
            if let Some(s) = start.take() {
                spans.push((s, i));
                if spans.len() == count {
                    return Scan::Complete { spans, end: i + 1 };
                }
            }
            if byte == b'\n' {
                return Scan::LineEnded { tokens: spans.len(), end: i + 1 };
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    Scan::Incomplete
}

fn line_text(line: &[u8]) -> Result<&str> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    std::str::from_utf8(line).map_err(|_| ProtocolError::NotUtf8)
}

fn leading_verb(buf: &[u8]) -> Result<Verb> {
    let end = buf.iter().position(|b| *b == b' ' || *b == b'\n').unwrap_or(buf.len());
    let token = &buf[..end];
    Verb::parse(token).ok_or_else(|| {
        ProtocolError::UnknownVerb(String::from_utf8_lossy(token).into_owned())
    })
}

/// Parses one datagram.
///
/// The trailing newline is optional. Verbs bound to the stream transport are
/// refused.
pub fn decode_datagram(datagram: &[u8]) -> Result<Request> {
    let verb = leading_verb(datagram)?;
    if verb.transport() != Transport::Datagram {
        return Err(ProtocolError::WrongTransport { verb, transport: Transport::Datagram });
    }
    Request::parse_line(line_text(datagram)?)
}

/// Size limits enforced while framing stream requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderLimits {
    /// Longest header accepted before its terminator shows up
    pub max_header_bytes: usize,
    /// Largest `CRE` payload accepted
    pub max_payload_bytes: u64,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: MAX_HEADER_BYTES,
            max_payload_bytes: DEFAULT_MAX_DESCRIPTION_BYTES,
        }
    }
}

#[derive(Debug)]
enum DecodeState {
    Header,
    Payload { args: Vec<String>, size: usize },
}

/// Incremental decoder for the single request of a stream connection.
#[derive(Debug)]
pub struct StreamDecoder {
    limits: DecoderLimits,
    state: DecodeState,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new(DecoderLimits::default())
    }
}

impl StreamDecoder {
    /// Creates a decoder with the given limits.
    pub fn new(limits: DecoderLimits) -> Self {
        Self { limits, state: DecodeState::Header }
    }

    /// Whether the header is done and payload bytes are still expected.
    pub fn awaiting_payload(&self) -> bool {
        matches!(self.state, DecodeState::Payload { .. })
    }

    /// Consumes bytes from `buf` and returns the request once complete.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Bytes belonging to the
    /// request are removed from `buf`; anything after it is left in place.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Request>> {
        loop {
            match std::mem::replace(&mut self.state, DecodeState::Header) {
                DecodeState::Header => {
                    let Some(verb) = self.peek_verb(buf)? else {
                        return Ok(None);
                    };
                    if verb != Verb::Cre {
                        let Some(newline) = buf.iter().position(|b| *b == b'\n') else {
                            self.check_header_len(buf)?;
                            return Ok(None);
                        };
                        self.check_header_len(&buf[..newline])?;
                        let line = buf.split_to(newline + 1);
                        return Request::parse_line(line_text(&line)?).map(Some);
                    }

                    match scan_tokens(buf, verb.arity() + 1) {
                        Scan::Incomplete => {
                            self.check_header_len(buf)?;
                            return Ok(None);
                        },
                        Scan::LineEnded { tokens, end } => {
                            buf.advance(end);
                            return Err(ProtocolError::ArgumentCount {
                                verb,
                                expected: verb.arity(),
                                got: tokens.saturating_sub(1),
                            });
                        },
                        Scan::Complete { spans, end } => {
                            if end > self.limits.max_header_bytes {
                                return Err(ProtocolError::HeaderTooLong {
                                    max: self.limits.max_header_bytes,
                                });
                            }
                            let header = std::str::from_utf8(&buf[..end])
                                .map_err(|_| ProtocolError::NotUtf8)?;
                            let args: Vec<String> = spans[1..]
                                .iter()
                                .map(|&(start, stop)| header[start..stop].to_owned())
                                .collect();
                            let size = parse_payload_size(&args[7])
                                .map_err(|source| ProtocolError::InvalidField { verb, source })?;
                            if size > self.limits.max_payload_bytes {
                                return Err(ProtocolError::PayloadTooLarge {
                                    verb,
                                    size,
                                    max: self.limits.max_payload_bytes,
                                });
                            }
                            buf.advance(end);
                            self.state = DecodeState::Payload { args, size: size as usize };
                        },
                    }
                },
                DecodeState::Payload { args, size } => {
                    if buf.len() < size {
                        buf.reserve(size - buf.len());
                        self.state = DecodeState::Payload { args, size };
                        return Ok(None);
                    }
                    let payload: Bytes = buf.split_to(size).freeze();
                    if buf.first() == Some(&b'\n') {
                        buf.advance(1);
                    }
                    let args: Vec<&str> = args.iter().map(String::as_str).collect();
                    return Request::from_args(Verb::Cre, &args, payload).map(Some);
                },
            }
        }
    }

    /// Finishes decoding once the peer has stopped sending.
    ///
    /// A header without its final newline is still parsed. A payload that
    /// never completed is reported as [`ProtocolError::Truncated`].
    pub fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Request>> {
        if let Some(request) = self.decode(buf)? {
            return Ok(Some(request));
        }
        match std::mem::replace(&mut self.state, DecodeState::Header) {
            DecodeState::Header if buf.is_empty() => Ok(None),
            DecodeState::Header => {
                let line = buf.split();
                self.peek_verb(&line)?;
                Request::parse_line(line_text(&line)?).map(Some)
            },
            DecodeState::Payload { size, .. } => Err(ProtocolError::Truncated {
                verb: Verb::Cre,
                expected: size,
                received: buf.len(),
            }),
        }
    }

    /// Identifies the verb once its delimiter is buffered.
    fn peek_verb(&self, buf: &[u8]) -> Result<Option<Verb>> {
        let delimited = buf.iter().take(4).any(|b| *b == b' ' || *b == b'\n');
        if !delimited && buf.len() < 4 {
            if buf.is_empty() {
                return Ok(None);
            }
            // A prefix of a verb might still be completed by the next read.
            let prefix_of_verb =
                Verb::ALL.iter().any(|verb| verb.as_str().as_bytes().starts_with(buf));
            if prefix_of_verb {
                return Ok(None);
            }
        }
        let verb = leading_verb(buf)?;
        if verb.transport() != Transport::Stream {
            return Err(ProtocolError::WrongTransport { verb, transport: Transport::Stream });
        }
        Ok(Some(verb))
    }

    fn check_header_len(&self, buf: &[u8]) -> Result<()> {
        if buf.len() > self.limits.max_header_bytes {
            Err(ProtocolError::HeaderTooLong { max: self.limits.max_header_bytes })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const CREATE: &[u8] = b"CRE 123456 pass1234 Conf 01-01-2099 10:00 10 desc.txt 5 hello";

    #[test]
    fn datagram_with_and_without_newline() {
        assert!(matches!(decode_datagram(b"LIN 000001 abcdefgh\n"), Ok(Request::Login { .. })));
        assert!(matches!(decode_datagram(b"LOU 000001 abcdefgh"), Ok(Request::Logout { .. })));
    }

    #[test]
    fn datagram_refuses_stream_verbs() {
        let err = decode_datagram(b"LST\n").unwrap_err();
        assert_eq!(err, ProtocolError::WrongTransport {
            verb: Verb::Lst,
            transport: Transport::Datagram
        });
        assert_eq!(err.reply_verb(), None);
    }

    #[test]
    fn stream_refuses_datagram_verbs() {
        let mut decoder = StreamDecoder::default();
        let mut buf = BytesMut::from(&b"LIN 123456 pass1234\n"[..]);
        assert!(matches!(decoder.decode(&mut buf), Err(ProtocolError::WrongTransport { .. })));
    }

    #[test]
    fn create_payload_spans_reads() {
        let mut decoder = StreamDecoder::default();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&CREATE[..30]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&CREATE[30..CREATE.len() - 2]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert!(decoder.awaiting_payload());
        buf.extend_from_slice(&CREATE[CREATE.len() - 2..]);

        let Some(Request::Create { description, .. }) = decoder.decode(&mut buf).unwrap() else {
            unreachable!("expected a create request");
        };
        assert_eq!(description.as_ref(), b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn create_payload_may_contain_spaces_and_newlines() {
        let mut decoder = StreamDecoder::default();
        let mut buf =
            BytesMut::from(&b"CRE 123456 pass1234 Conf 01-01-2099 10:00 10 d.txt 4 a \nb\n"[..]);
        let Some(Request::Create { description, .. }) = decoder.decode(&mut buf).unwrap() else {
            unreachable!("expected a create request");
        };
        assert_eq!(description.as_ref(), b"a \nb");
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_payload_fails_before_reading_it() {
        let limits = DecoderLimits { max_payload_bytes: 4, ..DecoderLimits::default() };
        let mut decoder = StreamDecoder::new(limits);
        let mut buf = BytesMut::from(CREATE);
        let err = decoder.decode(&mut buf).unwrap_err();
        assert_eq!(err, ProtocolError::PayloadTooLarge { verb: Verb::Cre, size: 5, max: 4 });
        assert_eq!(err.reply_verb(), Some(Verb::Cre));
    }

    #[test]
    fn unterminated_header_is_bounded() {
        let mut decoder = StreamDecoder::default();
        let mut buf = BytesMut::from(&b"SED "[..]);
        buf.extend_from_slice(&[b'1'; MAX_HEADER_BYTES]);
        assert!(matches!(decoder.decode(&mut buf), Err(ProtocolError::HeaderTooLong { .. })));
    }

    #[test]
    fn short_create_header_is_argument_error() {
        let mut decoder = StreamDecoder::default();
        let mut buf = BytesMut::from(&b"CRE 123456 pass1234 Conf\n"[..]);
        let err = decoder.decode(&mut buf).unwrap_err();
        assert_eq!(err, ProtocolError::ArgumentCount { verb: Verb::Cre, expected: 8, got: 3 });
    }

    #[test]
    fn eof_completes_unterminated_line() {
        let mut decoder = StreamDecoder::default();
        let mut buf = BytesMut::from(&b"LST"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert_eq!(decoder.decode_eof(&mut buf).unwrap(), Some(Request::List));
    }

    #[test]
    fn eof_inside_payload_is_truncation() {
        let mut decoder = StreamDecoder::default();
        let mut buf = BytesMut::from(&CREATE[..CREATE.len() - 3]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        let err = decoder.decode_eof(&mut buf).unwrap_err();
        assert_eq!(err, ProtocolError::Truncated { verb: Verb::Cre, expected: 5, received: 2 });
    }

    #[test]
    fn unknown_verb_fails_closed() {
        let mut decoder = StreamDecoder::default();
        let mut buf = BytesMut::from(&b"HELLO there\n"[..]);
        assert!(matches!(decoder.decode(&mut buf), Err(ProtocolError::UnknownVerb(_))));
    }
}
