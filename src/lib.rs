//! # TallyKV - An In-Memory Key-Value Server
//!
//! TallyKV speaks the Redis serialization protocol (RESP) over TCP, keeps
//! strings and hashes in memory with optional per-key deadlines, and records
//! mutating commands in an append-only log that is replayed on startup.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              TallyKV                                 │
//! │                                                                      │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐               │
//! │  │ TCP Server  │───>│ Connection  │───>│ Dispatcher  │               │
//! │  │ (Listener)  │    │  Handler    │    │             │               │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘               │
//! │                            │                  │                      │
//! │                            ▼                  ▼                      │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────────────┐  │
//! │  │ RESP codec  │    │ AppendLog   │    │        Keyspace          │  │
//! │  │             │    │ (.aof file) │    │ strings │ hashes │ expiry │  │
//! │  └─────────────┘    └─────────────┘    └──────────────────────────┘  │
//! │                                                   ▲                  │
//! │                                        ┌──────────┴─────────┐        │
//! │                                        │   ExpirySweeper    │        │
//! │                                        │ (background task)  │        │
//! │                                        └────────────────────┘        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use tallykv::{server, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     server::run(Config::default()).await
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`
//! - `SET key value [EX seconds | EXAT unix-seconds]` / `GET key`
//! - `INCR key` / `DECR key`
//! - `HSET key field value` / `HGET key field` / `HGETALL key` / `HDEL key field` / `HLEN key`
//! - `DEL key` / `FLUSHALL`
//! - `EXPIRE key seconds` / `EXPIREAT key unix-seconds` / `TTL key` / `PERSIST key`
//! - `INFO`
//!
//! ## Expiry
//!
//! Deadlines are whole unix seconds. `GET` drops an expired key when it sees
//! one; everything else is left to the sweeper, which runs once a second by
//! default.

pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod storage;

pub use commands::Dispatcher;
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats, SharedState};
pub use persistence::{AppendLog, FsyncPolicy, PersistenceError};
pub use protocol::{Command, ParseError, RespParser, RespValue};
pub use storage::{ExpiryConfig, ExpirySweeper, Keyspace};

/// Default listening port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
