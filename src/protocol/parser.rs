//! Incremental RESP Decoder
//!
//! [`RespDecoder`] is a resumable state machine over a `BytesMut` buffer.
//! Callers append whatever arrived from the network and call
//! [`decode`](RespDecoder::decode) until it reports that more data is needed.
//!
//! ## States
//!
//! ```text
//!            ┌──────────── '$n' header ─────────────┐
//!            │                                      ▼
//!     ┌────────────┐                        ┌──────────────┐
//!     │ ReadLine   │ ◄──── payload+CRLF ─── │ ReadBulkBody │
//!     └────────────┘                        └──────────────┘
//!            │ '*n' header (n > 0)
//!            ▼
//!     pending array: the next n values are collected into one Array
//! ```
//!
//! `decode` returns:
//! - `Ok(Some(value))` - a complete value was taken off the front of the buffer
//! - `Ok(None)` - the buffer holds only part of a value; read more
//! - `Err(ParseError)` - the input was malformed. The offending bytes have
//!   been consumed and any half-built array is discarded, so decoding can
//!   simply continue with the next line.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

use crate::protocol::types::{prefix, RespValue, CRLF};

/// Errors that can occur while decoding RESP.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid multibulk length: {0}")]
    InvalidArrayLength(i64),

    /// A line or bulk payload was not terminated with CRLF
    #[error("expected CRLF terminator")]
    MissingCrlf,

    /// An array header appeared while an array was being collected
    #[error("nested arrays are not supported")]
    NestedArray,

    /// The message exceeds maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The underlying byte source failed
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    /// True if the stream cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ParseError::Io(_))
    }
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum length of a single header or inline line.
pub const MAX_LINE_SIZE: usize = 64 * 1024;

/// Maximum element count of one array.
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Upper bound on buffer space reserved ahead of a bulk payload.
///
/// A declared length is only a claim; the buffer grows with the bytes that
/// actually arrive.
const BULK_RESERVE_LIMIT: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Line,
    BulkBody { len: usize },
}

#[derive(Debug)]
struct PendingArray {
    expected: usize,
    items: Vec<RespValue>,
}

enum Step {
    Emit(RespValue),
    Continue,
}

/// A resumable RESP decoder.
///
/// # Example
///
/// ```
/// use memkv::protocol::{RespDecoder, RespValue};
/// use bytes::BytesMut;
///
/// let mut decoder = RespDecoder::new();
/// let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$1\r\nA"[..]);
/// assert!(decoder.decode(&mut buf).unwrap().is_none());
///
/// buf.extend_from_slice(b"\r\n");
/// let value = decoder.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(value, RespValue::command(["GET", "A"]));
/// ```
#[derive(Debug)]
pub struct RespDecoder {
    state: ReadState,
    array: Option<PendingArray>,
}

impl Default for RespDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RespDecoder {
    pub fn new() -> Self {
        Self {
            state: ReadState::Line,
            array: None,
        }
    }

    /// True if no partially decoded value is pending.
    pub fn is_idle(&self) -> bool {
        self.state == ReadState::Line && self.array.is_none()
    }

    fn reset(&mut self) {
        self.state = ReadState::Line;
        self.array = None;
    }

    /// Decodes the next complete value from the front of `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> ParseResult<Option<RespValue>> {
        loop {
            let step = match self.state {
                ReadState::Line => {
                    let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
                        if buf.len() > MAX_LINE_SIZE {
                            let size = buf.len();
                            buf.clear();
                            self.reset();
                            return Err(ParseError::MessageTooLarge {
                                size,
                                max: MAX_LINE_SIZE,
                            });
                        }
                        return Ok(None);
                    };

                    let line = buf.split_to(pos + 1).freeze();
                    if pos == 0 || line[pos - 1] != b'\r' {
                        self.reset();
                        return Err(ParseError::MissingCrlf);
                    }
                    match self.decode_line(line.slice(..pos - 1)) {
                        Ok(step) => step,
                        Err(e) => {
                            self.reset();
                            return Err(e);
                        }
                    }
                }
                ReadState::BulkBody { len } => {
                    if buf.len() < len + CRLF.len() {
                        buf.reserve((len + CRLF.len() - buf.len()).min(BULK_RESERVE_LIMIT));
                        return Ok(None);
                    }
                    let data = buf.split_to(len).freeze();
                    let terminated = &buf[..CRLF.len()] == CRLF;
                    buf.advance(CRLF.len());
                    self.state = ReadState::Line;
                    if !terminated {
                        self.reset();
                        return Err(ParseError::MissingCrlf);
                    }
                    Step::Emit(RespValue::BulkString(data))
                }
            };

            if let Step::Emit(value) = step {
                if let Some(value) = self.collect(value) {
                    return Ok(Some(value));
                }
            }
        }
    }

    /// Routes a finished value into the pending array, if any.
    fn collect(&mut self, value: RespValue) -> Option<RespValue> {
        let Some(pending) = self.array.as_mut() else {
            return Some(value);
        };
        pending.items.push(value);
        if pending.items.len() < pending.expected {
            return None;
        }
        self.array
            .take()
            .map(|pending| RespValue::Array(pending.items))
    }

    fn decode_line(&mut self, line: Bytes) -> ParseResult<Step> {
        let Some(&tag) = line.first() else {
            return Ok(Step::Emit(RespValue::Plain(String::new())));
        };
        let body = &line[1..];

        let value = match tag {
            prefix::SIMPLE_STRING => RespValue::SimpleString(text(body)),
            prefix::ERROR => RespValue::Error(text(body)),
            prefix::INTEGER => RespValue::Integer(parse_int(body)?),
            prefix::BULK_STRING => {
                let len = parse_int(body)?;
                match len {
                    -1 => RespValue::NullBulk,
                    n if n < 0 => return Err(ParseError::InvalidBulkLength(n)),
                    n if n as u64 > MAX_BULK_SIZE as u64 => {
                        return Err(ParseError::MessageTooLarge {
                            size: n as usize,
                            max: MAX_BULK_SIZE,
                        })
                    }
                    n => {
                        self.state = ReadState::BulkBody { len: n as usize };
                        return Ok(Step::Continue);
                    }
                }
            }
            prefix::ARRAY => {
                if self.array.is_some() {
                    return Err(ParseError::NestedArray);
                }
                let len = parse_int(body)?;
                match len {
                    -1 => RespValue::NullArray,
                    0 => RespValue::Array(Vec::new()),
                    n if n < 0 => return Err(ParseError::InvalidArrayLength(n)),
                    n if n as u64 > MAX_ARRAY_LEN as u64 => {
                        return Err(ParseError::InvalidArrayLength(n))
                    }
                    n => {
                        let expected = n as usize;
                        self.array = Some(PendingArray {
                            expected,
                            items: Vec::with_capacity(expected.min(64)),
                        });
                        return Ok(Step::Continue);
                    }
                }
            }
            _ => RespValue::Plain(text(&line)),
        };
        Ok(Step::Emit(value))
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn parse_int(bytes: &[u8]) -> ParseResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ParseError::InvalidInteger(text(bytes)))
}

/// Decodes every complete value in `data`.
///
/// Stops at the first error or at a trailing incomplete value.
pub fn decode_all(data: &[u8]) -> ParseResult<Vec<RespValue>> {
    let mut buf = BytesMut::from(data);
    let mut decoder = RespDecoder::new();
    let mut values = Vec::new();
    while let Some(value) = decoder.decode(&mut buf)? {
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(data: &[u8]) -> ParseResult<Option<RespValue>> {
        let mut buf = BytesMut::from(data);
        RespDecoder::new().decode(&mut buf)
    }

    #[test]
    fn test_decode_command_array() {
        let value = decode_one(b"*2\r\n$3\r\nGET\r\n$1\r\nA\r\n").unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::Array(vec![
                RespValue::BulkString(Bytes::from("GET")),
                RespValue::BulkString(Bytes::from("A")),
            ])
        );
    }

    #[test]
    fn test_decode_scalars() {
        let values = decode_all(b"+OK\r\n-ERR bad\r\n:1000\r\n:-42\r\n").unwrap();
        assert_eq!(
            values,
            vec![
                RespValue::SimpleString("OK".into()),
                RespValue::Error("ERR bad".into()),
                RespValue::Integer(1000),
                RespValue::Integer(-42),
            ]
        );
    }

    #[test]
    fn test_null_bulk_distinct_from_empty() {
        assert_eq!(decode_one(b"$-1\r\n").unwrap(), Some(RespValue::NullBulk));
        assert_eq!(
            decode_one(b"$0\r\n\r\n").unwrap(),
            Some(RespValue::BulkString(Bytes::new()))
        );
    }

    #[test]
    fn test_null_and_empty_array() {
        assert_eq!(decode_one(b"*-1\r\n").unwrap(), Some(RespValue::NullArray));
        assert_eq!(decode_one(b"*0\r\n").unwrap(), Some(RespValue::Array(vec![])));
    }

    #[test]
    fn test_binary_bulk() {
        let value = decode_one(b"$4\r\n\r\n\x00\xff\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Bytes::from_static(b"\r\n\x00\xff")));
    }

    #[test]
    fn test_plain_line() {
        assert_eq!(
            decode_one(b"PING\r\n").unwrap(),
            Some(RespValue::Plain("PING".into()))
        );
        assert_eq!(decode_one(b"\r\n").unwrap(), Some(RespValue::Plain(String::new())));
    }

    #[test]
    fn test_incremental_byte_by_byte() {
        let input = b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n";
        let mut decoder = RespDecoder::new();
        let mut buf = BytesMut::new();
        let mut result = None;
        for (i, &byte) in input.iter().enumerate() {
            buf.extend_from_slice(&[byte]);
            if let Some(value) = decoder.decode(&mut buf).unwrap() {
                assert_eq!(i, input.len() - 1);
                result = Some(value);
            }
        }
        assert_eq!(result, Some(RespValue::command(["SET", "key", "value"])));
        assert!(decoder.is_idle());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_pipelined_values() {
        let values = decode_all(b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n").unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1], RespValue::command(["ECHO", "hi"]));
    }

    #[test]
    fn test_missing_crlf_recovers() {
        let mut decoder = RespDecoder::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n:5\n+OK\r\n"[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ParseError::MissingCrlf)
        ));
        // The half-built array was dropped; the next line decodes on its own.
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(RespValue::SimpleString("OK".into()))
        );
    }

    #[test]
    fn test_bad_bulk_terminator() {
        let mut decoder = RespDecoder::new();
        let mut buf = BytesMut::from(&b"$3\r\nabcXY:1\r\n"[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ParseError::MissingCrlf)
        ));
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(RespValue::Integer(1)));
    }

    #[test]
    fn test_nested_array_rejected() {
        assert!(matches!(
            decode_one(b"*2\r\n*1\r\n:1\r\n"),
            Err(ParseError::NestedArray)
        ));
    }

    #[test]
    fn test_invalid_lengths() {
        assert!(matches!(
            decode_one(b"$-2\r\n"),
            Err(ParseError::InvalidBulkLength(-2))
        ));
        assert!(matches!(
            decode_one(b"*-5\r\n"),
            Err(ParseError::InvalidArrayLength(-5))
        ));
        assert!(matches!(
            decode_one(b":abc\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
    }

    #[test]
    fn test_oversized_line() {
        let data = vec![b'a'; MAX_LINE_SIZE + 1];
        assert!(matches!(
            decode_one(&data),
            Err(ParseError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_large_declared_bulk_reserves_little() {
        let mut decoder = RespDecoder::new();
        let mut buf = BytesMut::from(&b"$100000000\r\nabc"[..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(buf.capacity() < 1024 * 1024, "capacity {}", buf.capacity());
        assert!(!decoder.is_idle());

        // The payload still decodes once it arrives in pieces.
        let mut decoder = RespDecoder::new();
        let payload = vec![b'x'; 200 * 1024];
        let mut buf = BytesMut::from(format!("${}\r\n", payload.len()).as_bytes());
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        for chunk in payload.chunks(50 * 1024) {
            buf.extend_from_slice(chunk);
            assert!(decoder.decode(&mut buf).unwrap().is_none());
        }
        buf.extend_from_slice(b"\r\n");
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(RespValue::BulkString(Bytes::from(payload)))
        );
    }

    #[test]
    fn test_every_variant_survives_a_round_trip() {
        let values = vec![
            RespValue::SimpleString("OK".into()),
            RespValue::Error("WRONGTYPE Operation against a key".into()),
            RespValue::Integer(0),
            RespValue::Integer(i64::MIN),
            RespValue::BulkString(Bytes::from_static(b"a\r\n\x00b")),
            RespValue::BulkString(Bytes::new()),
            RespValue::NullBulk,
            RespValue::Array(vec![
                RespValue::BulkString(Bytes::from_static(b"SET")),
                RespValue::Integer(7),
                RespValue::NullBulk,
                RespValue::SimpleString("x".into()),
                RespValue::Error("ERR e".into()),
            ]),
            RespValue::Array(vec![]),
            RespValue::NullArray,
            RespValue::Plain("PING extra".into()),
        ];

        let mut wire = Vec::new();
        for value in &values {
            let encoded = value.serialize();
            let decoded = decode_all(&encoded).unwrap();
            assert_eq!(decoded, vec![value.clone()]);
            assert_eq!(decoded[0].serialize(), encoded);
            wire.extend_from_slice(&encoded);
        }
        assert_eq!(decode_all(&wire).unwrap(), values);
    }

    #[test]
    fn test_encode_decode_is_identity() {
        let wire: &[u8] = b"*3\r\n$3\r\nSET\r\n$0\r\n\r\n$-1\r\n";
        let values = decode_all(wire).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].serialize(), wire);
    }
}
