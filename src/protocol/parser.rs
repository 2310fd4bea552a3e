//! Resumable Wire Decoder
//!
//! The decoder works on whatever bytes have arrived so far and reports one of:
//!
//! - `Ok(Some((value, consumed)))`: a complete value used the first `consumed` bytes
//! - `Ok(None)`: the value is not complete yet, read more and call again
//! - `Err(ParseError)`: the bytes can never form a valid value
//!
//! A short read is therefore never an error. The caller keeps the unconsumed
//! tail in its buffer and retries after the next read. The same decoder is used
//! for client sockets and for replaying the append-only log.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while decoding.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// First byte is not one of `+ - : $ *`
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Simple strings and errors must be UTF-8
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Negative bulk length other than -1
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Negative array count other than -1
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Largest accepted bulk payload (512 MiB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Deepest accepted array nesting.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Incremental decoder.
///
/// The parser itself holds no buffered bytes, so one instance can be reused
/// across reads and across frames.
///
/// ```
/// use tallykv::protocol::{RespParser, RespValue};
///
/// let mut parser = RespParser::new();
/// let wire = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
///
/// assert!(parser.parse(&wire[..10]).unwrap().is_none());
/// let (value, consumed) = parser.parse(wire).unwrap().unwrap();
/// assert_eq!(consumed, wire.len());
/// assert!(matches!(value, RespValue::Array(ref items) if items.len() == 2));
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to decode one value from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => {
                Ok(read_text_line(buf)?.map(|(s, n)| (RespValue::SimpleString(s), n)))
            }
            prefix::ERROR => Ok(read_text_line(buf)?.map(|(s, n)| (RespValue::Error(s), n))),
            prefix::INTEGER => Ok(read_int_line(buf)?.map(|(i, n)| (RespValue::Integer(i), n))),
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// `$<length>\r\n<data>\r\n`, or `$-1\r\n` for null.
    fn parse_bulk_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let (length, header_len) = match read_int_line(buf)? {
            Some(header) => header,
            None => return Ok(None),
        };

        if length == -1 {
            return Ok(Some((RespValue::Null, header_len)));
        }
        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let total = header_len + length + CRLF.len();
        if buf.len() < total {
            return Ok(None);
        }

        if &buf[header_len + length..total] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[header_len..header_len + length]);
        Ok(Some((RespValue::BulkString(data), total)))
    }

    /// `*<count>\r\n<elements...>`, or `*-1\r\n` for null.
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let (count, header_len) = match read_int_line(buf)? {
            Some(header) => header,
            None => return Ok(None),
        };

        if count == -1 {
            return Ok(Some((RespValue::Null, header_len)));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        // Never trust the announced count for preallocation.
        let mut elements = Vec::with_capacity((count as usize).min(1024));
        let mut consumed = header_len;

        self.depth += 1;
        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => {
                    self.depth -= 1;
                    return Ok(None);
                }
            }
        }
        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Reads `<prefix><text>\r\n` and returns the text plus bytes consumed.
fn read_text_line(buf: &[u8]) -> ParseResult<Option<(String, usize)>> {
    match find_crlf(&buf[1..]) {
        Some(pos) => {
            let text = std::str::from_utf8(&buf[1..1 + pos])
                .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
            Ok(Some((text.to_string(), 1 + pos + CRLF.len())))
        }
        None => Ok(None),
    }
}

/// Reads `<prefix><decimal>\r\n`.
fn read_int_line(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    match read_text_line(buf) {
        Ok(Some((text, consumed))) => {
            let n = text
                .parse::<i64>()
                .map_err(|_| ParseError::InvalidInteger(text.clone()))?;
            Ok(Some((n, consumed)))
        }
        Ok(None) => Ok(None),
        Err(ParseError::InvalidUtf8(detail)) => Err(ParseError::InvalidInteger(detail)),
        Err(e) => Err(e),
    }
}

/// Position of the first `\r\n` in `buf`.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes a single value with a throwaway parser.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}
