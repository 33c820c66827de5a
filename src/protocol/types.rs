//! RESP values and their wire encoding.
//!
//! Every frame starts with a one-byte type tag and ends with CRLF:
//!
//! | Tag | Kind          | Example                                |
//! |-----|---------------|----------------------------------------|
//! | `+` | simple string | `+OK\r\n`                              |
//! | `-` | error         | `-ERR unknown command\r\n`             |
//! | `:` | integer       | `:1000\r\n`                            |
//! | `$` | bulk string   | `$5\r\nhello\r\n`, null is `$-1\r\n`   |
//! | `*` | array         | `*1\r\n$4\r\nPING\r\n`, null is `*-1\r\n` |
//!
//! A line with any other first byte is an inline command such as `PING\r\n`.

use bytes::Bytes;

/// Line terminator.
pub const CRLF: &[u8] = b"\r\n";

/// Type tags.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// One decoded request or one reply.
///
/// Null bulk strings and null arrays get their own variants so a reply
/// encodes back to exactly the bytes a client expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+text`, never contains CR or LF.
    SimpleString(String),
    /// `-message`
    Error(String),
    Integer(i64),
    /// Binary-safe payload.
    BulkString(Bytes),
    NullBulk,
    Array(Vec<RespValue>),
    NullArray,
    /// An inline command line, without a type tag.
    Plain(String),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// ```
    /// use memkv::RespValue;
    /// assert_eq!(RespValue::error("ERR nope").serialize(), b"-ERR nope\r\n");
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// The "no such value" reply, `$-1`.
    pub fn null() -> Self {
        RespValue::NullBulk
    }

    pub fn null_array() -> Self {
        RespValue::NullArray
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// An array of bulk strings, the form clients send commands in.
    ///
    /// ```
    /// use memkv::RespValue;
    /// let frame = RespValue::command(["GET", "name"]);
    /// assert_eq!(frame.serialize(), b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
    /// ```
    pub fn command<I, B>(args: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let items = args
            .into_iter()
            .map(|arg| RespValue::BulkString(arg.into()))
            .collect();
        RespValue::Array(items)
    }

    pub fn ok() -> Self {
        RespValue::simple_string("OK")
    }

    pub fn pong() -> Self {
        RespValue::simple_string("PONG")
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len_hint());
        self.serialize_into(&mut buf);
        buf
    }

    /// Appends the encoding of this value to `buf`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => put_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(msg) => put_line(buf, prefix::ERROR, msg.as_bytes()),
            RespValue::Integer(n) => put_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                put_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::NullBulk => put_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(items) => {
                put_line(buf, prefix::ARRAY, items.len().to_string().as_bytes());
                items.iter().for_each(|item| item.serialize_into(buf));
            }
            RespValue::NullArray => put_line(buf, prefix::ARRAY, b"-1"),
            RespValue::Plain(line) => {
                buf.extend_from_slice(line.as_bytes());
                buf.extend_from_slice(CRLF);
            }
        }
    }

    /// Rough size of the encoding, for preallocation.
    fn encoded_len_hint(&self) -> usize {
        match self {
            RespValue::BulkString(data) => data.len() + 16,
            RespValue::Array(items) => 16 + items.len() * 16,
            _ => 32,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::NullBulk | RespValue::NullArray)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Text content of a string-like value, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) | RespValue::Plain(s) => Some(s),
            RespValue::BulkString(data) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(data) => Some(data),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<RespValue>> {
        if let RespValue::Array(items) = self {
            Some(items)
        } else {
            None
        }
    }

    /// Converts a decoded request into its argument list.
    ///
    /// Arrays yield one argument per element; a plain inline line is split
    /// on whitespace. Any other value is not a command.
    pub fn into_command(self) -> Option<Vec<Bytes>> {
        match self {
            RespValue::Array(items) => Some(items.into_iter().filter_map(into_arg).collect()),
            RespValue::Plain(line) => Some(
                line.split_whitespace()
                    .map(|word| Bytes::copy_from_slice(word.as_bytes()))
                    .collect(),
            ),
            _ => None,
        }
    }
}

fn put_line(buf: &mut Vec<u8>, tag: u8, body: &[u8]) {
    buf.reserve(body.len() + 3);
    buf.push(tag);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

fn into_arg(item: RespValue) -> Option<Bytes> {
    match item {
        RespValue::BulkString(data) => Some(data),
        RespValue::SimpleString(s) | RespValue::Plain(s) => Some(Bytes::from(s)),
        RespValue::Integer(n) => Some(Bytes::from(n.to_string())),
        RespValue::NullBulk => Some(Bytes::new()),
        _ => None,
    }
}
