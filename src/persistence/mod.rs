//! Persistence
//!
//! A single append-only log of mutating commands. Connections append after a
//! command has been applied; startup replays the whole file before the
//! listener binds, and cuts off any torn or corrupt tail before new records
//! are appended behind it.
//!
//! ```text
//!   Connection ──► Dispatcher ──► Keyspace
//!        │
//!        └── log_form ──► AppendLog ──► database.aof
//!                                           │
//!   startup: replay ◄───────────────────────┘
//! ```

pub mod aof;

pub use aof::{
    replay, replay_into, truncate_damaged_tail, AppendLog, FsyncPolicy, FsyncTask,
    PersistenceError, ReplayStats, SharedAppendLog,
};
