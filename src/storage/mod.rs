//! Storage
//!
//! The keyspace engine and its background expiry sweeper.
//!
//! ```text
//!   strings ──┐
//!   hashes  ──┼── Keyspace ◄── ExpirySweeper (Tokio task, every 1s)
//!   expiry  ──┘
//! ```
//!
//! ```
//! use tallykv::storage::Keyspace;
//! use bytes::Bytes;
//!
//! let keyspace = Keyspace::new();
//! keyspace.set(Bytes::from("name"), Bytes::from("Ada"), None);
//! assert_eq!(keyspace.get(b"name"), Some(Bytes::from("Ada")));
//!
//! keyspace.hset(Bytes::from("user"), Bytes::from("lang"), Bytes::from("rust"));
//! assert_eq!(keyspace.hlen(b"user"), 1);
//! assert_eq!(keyspace.ttl(b"user"), -1);
//! ```

pub mod expiry;
pub mod keyspace;

pub use expiry::{ExpiryConfig, ExpirySweeper};
pub use keyspace::{unix_now, Keyspace, KeyspaceError, KeyspaceStats};
