//! Wire Protocol
//!
//! Encoding and decoding of the Redis serialization protocol, shared by client
//! connections and the append-only log.
//!
//! - `types`: the [`RespValue`] sum type and its encoder
//! - `parser`: the resumable decoder
//! - `command`: validation of decoded frames into [`Command`]s
//!
//! ```
//! use tallykv::protocol::{parse_message, Command, RespValue};
//!
//! let (frame, _) = parse_message(b"*2\r\n$3\r\nget\r\n$4\r\nname\r\n").unwrap().unwrap();
//! let command = Command::from_frame(frame).unwrap();
//! assert_eq!(command.name, "GET");
//!
//! assert_eq!(RespValue::bulk_string("Ada").serialize(), b"$3\r\nAda\r\n");
//! ```

pub mod command;
pub mod parser;
pub mod types;

pub use command::{Command, CommandError};
pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
