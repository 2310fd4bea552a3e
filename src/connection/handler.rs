//! Connection Handler
//!
//! One task per client. The loop reads into a buffer, decodes as many whole
//! frames as the buffer holds, answers each in order, and only then goes back
//! to the socket.
//!
//! ```text
//!   read ──► decode frame ──► Command::from_frame ──► known? ──► dispatch ──► reply
//!    ▲            │                  │                  │           │
//!    │      protocol error     invalid request    unknown command   └─► AppendLog
//!    │       reply + close      reply, continue    reply, continue      (if persisted)
//!    └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! TCP is a stream, so one read may carry half a command or several pipelined
//! ones. Unconsumed bytes stay in the buffer until the rest arrives.

use crate::commands::Dispatcher;
use crate::persistence::SharedAppendLog;
use crate::protocol::parser::MAX_BULK_SIZE;
use crate::protocol::{Command, ParseError, RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Most unparsed bytes a client may leave buffered.
const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + 64 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Server-wide connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Everything a connection shares with the rest of the server.
#[derive(Debug, Clone)]
pub struct SharedState {
    pub dispatcher: Dispatcher,
    /// `None` when the append-only log is disabled
    pub log: Option<SharedAppendLog>,
    pub stats: Arc<ConnectionStats>,
}

impl SharedState {
    pub fn new(dispatcher: Dispatcher, log: Option<SharedAppendLog>) -> Self {
        Self {
            dispatcher,
            log,
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    /// Validates, executes and, when required, logs one decoded frame.
    ///
    /// A persisted command runs in its log form, so the record on disk is
    /// exactly what was applied. The log lock is held meanwhile, so records
    /// land in the file in the order their effects hit the keyspace.
    pub async fn process(&self, frame: RespValue) -> RespValue {
        let command = match Command::from_frame(frame) {
            Ok(command) => command,
            Err(e) => {
                debug!(error = %e, "Rejected request");
                return RespValue::error("ERR invalid request");
            }
        };

        if !self.dispatcher.is_known(&command.name) {
            return RespValue::error(format!(
                "ERR unknown command '{}'",
                command.name.to_ascii_lowercase()
            ));
        }

        let log = self
            .log
            .as_ref()
            .filter(|_| self.dispatcher.should_persist(&command.name));

        let Some(log) = log else {
            return self.run(&command);
        };

        let record = self.dispatcher.log_form(&command);
        let mut log = log.lock().await;
        let response = self.run(&record);
        if let Err(e) = log.append(&record) {
            error!(command = %command.name, error = %e, "Failed to append to log");
        }
        response
    }

    fn run(&self, command: &Command) -> RespValue {
        self.stats.command_processed();
        // is_known was checked by the caller
        self.dispatcher
            .execute(command)
            .unwrap_or_else(|| RespValue::error("ERR unknown command"))
    }
}

/// State for one connected client.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    parser: RespParser,
    state: SharedState,
}

impl ConnectionHandler {
    pub fn new(stream: TcpStream, addr: SocketAddr, state: SharedState) -> Self {
        state.stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
            state,
        }
    }

    /// Serves the client until it disconnects or the stream becomes unusable.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::ClientDisconnected) => {
                info!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::IoError(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection closed with error"),
        }

        self.state.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(frame) = self.next_frame().await? {
                let response = self.state.process(frame).await;
                self.write_response(&response).await?;
            }

            self.stream.flush().await?;
            self.read_more_data().await?;
        }
    }

    /// Pops the next whole frame off the buffer. A decode error is answered
    /// before it is returned, since the connection is about to close.
    async fn next_frame(&mut self) -> Result<Option<RespValue>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((frame, consumed))) => {
                self.buffer.advance(consumed);
                trace!(
                    client = %self.addr,
                    consumed,
                    remaining = self.buffer.len(),
                    "Decoded frame"
                );
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Protocol error");
                self.reject(&e.to_string()).await?;
                Err(ConnectionError::ParseError(e))
            }
        }
    }

    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(client = %self.addr, size = self.buffer.len(), "Read buffer limit exceeded");
            self.reject("request too large").await?;
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.state.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(())
    }

    /// Buffers a reply; the loop flushes once the pending batch is answered.
    async fn write_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.stream.write_all(&bytes).await?;
        self.state.stats.bytes_written(bytes.len());
        Ok(())
    }

    async fn reject(&mut self, detail: &str) -> Result<(), ConnectionError> {
        let reply = RespValue::error(format!("ERR Protocol error: {}", detail));
        self.write_response(&reply).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    ParseError(#[from] ParseError),

    #[error("client disconnected")]
    ClientDisconnected,

    /// Stream closed partway through a request
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("read buffer limit exceeded")]
    BufferFull,
}

/// Runs a [`ConnectionHandler`] to completion.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: SharedState) {
    if let Err(e) = ConnectionHandler::new(stream, addr, state).run().await {
        trace!(client = %addr, error = %e, "Connection task finished");
    }
}
