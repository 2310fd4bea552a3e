//! Wire Values
//!
//! Every piece of data that crosses the wire, and every command result, is a
//! [`RespValue`]. The same type is written to the append-only log.
//!
//! ## Encoding
//!
//! Each value starts with a one-byte type prefix and lines end with CRLF:
//!
//! | Variant        | Bytes                          |
//! |----------------|--------------------------------|
//! | `SimpleString` | `+OK\r\n`                      |
//! | `Error`        | `-ERR syntax error\r\n`        |
//! | `Integer`      | `:42\r\n`                      |
//! | `BulkString`   | `$5\r\nhello\r\n`              |
//! | `Null`         | `$-1\r\n`                      |
//! | `Array`        | `*2\r\n$3\r\nGET\r\n$1\r\nk\r\n` |

use bytes::Bytes;
use std::fmt;

/// Line terminator.
pub const CRLF: &[u8] = b"\r\n";

/// Type prefixes.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single protocol value.
///
/// Errors are ordinary data: a failed command produces `RespValue::Error`,
/// it never unwinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status text such as `OK`. Must not contain CR or LF.
    SimpleString(String),

    /// Error text, conventionally prefixed with `ERR`.
    Error(String),

    /// Signed 64-bit integer.
    Integer(i64),

    /// Length-prefixed, binary-safe payload.
    BulkString(Bytes),

    /// Explicit absence of a value. Distinct from an empty bulk string.
    Null,

    /// Ordered sequence of values. Commands are arrays of bulk strings.
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a bulk string from anything convertible into `Bytes`.
    ///
    /// ```
    /// use tallykv::protocol::RespValue;
    /// let v = RespValue::bulk_string("hello");
    /// assert_eq!(v.serialize(), b"$5\r\nhello\r\n");
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// `+OK`
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// `+PONG`
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Encodes this value into a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Encodes this value, appending to `buf`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Returns the bulk payload, if any.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        }
    }
}

#[inline]
fn write_line(buf: &mut Vec<u8>, type_prefix: u8, body: &[u8]) {
    buf.push(type_prefix);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) if values.is_empty() => write!(f, "(empty array)"),
            RespValue::Array(values) => {
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
        }
    }
}
