//! Client Connections
//!
//! Each accepted socket gets its own Tokio task running a
//! [`ConnectionHandler`]. Handlers share a [`SharedState`]: the dispatcher,
//! the optional append-only log and the server-wide [`ConnectionStats`].
//!
//! ```ignore
//! use tallykv::connection::{handle_connection, SharedState};
//!
//! let state = SharedState::new(dispatcher, log);
//! loop {
//!     let (stream, addr) = listener.accept().await?;
//!     tokio::spawn(handle_connection(stream, addr, state.clone()));
//! }
//! ```

pub mod handler;

pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats, SharedState,
};
