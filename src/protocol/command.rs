//! Commands
//!
//! A command is a non-empty array of bulk strings: the first element is the
//! name, the rest are positional arguments. Anything else a client sends is an
//! invalid request.

use crate::protocol::types::RespValue;
use bytes::Bytes;
use thiserror::Error;

/// Reasons a decoded frame is not a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("request is not an array")]
    NotAnArray,

    #[error("request array is empty")]
    Empty,

    #[error("request element {0} is not a bulk string")]
    NotBulk(usize),

    #[error("command name is not valid UTF-8")]
    InvalidName,
}

/// A validated command with an upper-cased name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<Bytes>,
}

impl Command {
    /// Builds a command from its name and arguments.
    pub fn new(name: impl AsRef<str>, args: Vec<Bytes>) -> Self {
        Self {
            name: name.as_ref().to_ascii_uppercase(),
            args,
        }
    }

    /// Validates a decoded frame as an array of bulk strings.
    pub fn from_frame(frame: RespValue) -> Result<Self, CommandError> {
        let items = match frame {
            RespValue::Array(items) => items,
            _ => return Err(CommandError::NotAnArray),
        };

        let mut parts = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            match item {
                RespValue::BulkString(b) => parts.push(b),
                _ => return Err(CommandError::NotBulk(i)),
            }
        }

        if parts.is_empty() {
            return Err(CommandError::Empty);
        }

        let name_bytes = parts.remove(0);
        let name = std::str::from_utf8(&name_bytes).map_err(|_| CommandError::InvalidName)?;

        Ok(Self::new(name, parts))
    }

    /// Re-encodes the command as an array of bulk strings.
    pub fn to_frame(&self) -> RespValue {
        let mut items = Vec::with_capacity(self.args.len() + 1);
        items.push(RespValue::bulk_string(Bytes::from(self.name.clone())));
        items.extend(self.args.iter().cloned().map(RespValue::BulkString));
        RespValue::Array(items)
    }
}
