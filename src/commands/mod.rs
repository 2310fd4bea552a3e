//! Commands
//!
//! ```text
//!  Command ──► Dispatcher ──► handler ──► Keyspace
//!                  │
//!                  └── should_persist / log_form ──► AppendLog
//! ```
//!
//! The dispatcher is the only way in to the keyspace for connections and for
//! log replay.

pub mod handler;

pub use handler::Dispatcher;
