//! Append-Only Log
//!
//! Every persisted command is appended to one file in wire format, exactly as
//! a client would send it:
//!
//! ```text
//! *3\r\n$3\r\nSET\r\n$4\r\nname\r\n$3\r\nAda\r\n
//! *4\r\n$4\r\nHSET\r\n$4\r\nuser\r\n$4\r\nlang\r\n$4\r\nrust\r\n
//! ...
//! ```
//!
//! There is no header and no compaction; the file only grows. At startup
//! [`replay`] decodes it front to back with the same [`RespParser`] used for
//! sockets and feeds each command through the dispatcher.

use crate::commands::Dispatcher;
use crate::protocol::{Command, ParseError, RespParser};
use bytes::{Buf, BytesMut};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

const READ_CHUNK: usize = 64 * 1024;

/// How often appended bytes are forced to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FsyncPolicy {
    /// After every append
    Always,
    /// Once per second from a background task
    #[default]
    #[value(name = "everysec")]
    EverySec,
    /// Never explicitly; the OS decides
    No,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to open append-only log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("append-only log I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Writer half of the log.
#[derive(Debug)]
pub struct AppendLog {
    path: PathBuf,
    writer: BufWriter<File>,
    fsync: FsyncPolicy,
    scratch: Vec<u8>,
}

/// The log as shared by connections. Holding the lock serializes appends.
pub type SharedAppendLog = Arc<Mutex<AppendLog>>;

impl AppendLog {
    /// Opens `path` for appending, creating it and its parent directories if
    /// needed.
    pub fn open(path: impl AsRef<Path>, fsync: FsyncPolicy) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| PersistenceError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(open_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(open_err)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            fsync,
            scratch: Vec::with_capacity(256),
        })
    }

    pub fn into_shared(self) -> SharedAppendLog {
        Arc::new(Mutex::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encodes and appends one command, handing it to the OS before returning.
    pub fn append(&mut self, command: &Command) -> Result<(), PersistenceError> {
        self.scratch.clear();
        command.to_frame().serialize_into(&mut self.scratch);
        self.writer.write_all(&self.scratch)?;
        self.writer.flush()?;

        if self.fsync == FsyncPolicy::Always {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Flushes buffered bytes and syncs the file.
    pub fn sync(&mut self) -> Result<(), PersistenceError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}

/// Handle to the once-per-second fsync task. Dropping it stops the task.
#[derive(Debug)]
pub struct FsyncTask {
    shutdown_tx: watch::Sender<bool>,
}

impl FsyncTask {
    pub fn start(log: SharedAppendLog, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }

                if let Err(e) = log.lock().await.sync() {
                    error!(error = %e, "Failed to fsync append-only log");
                }
            }
        });

        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for FsyncTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Outcome of a replay.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReplayStats {
    /// Commands fed to the callback and accepted
    pub applied: usize,
    /// Records that were not commands, or named an unknown command
    pub skipped: usize,
    /// The file ended in the middle of a record
    pub truncated: bool,
    /// Replay stopped early on undecodable bytes
    pub decode_error: Option<ParseError>,
    /// Bytes from the start of the file up to the end of the last whole
    /// record
    pub valid_len: u64,
}

impl ReplayStats {
    /// Whether the file holds bytes past `valid_len` that replay could not use.
    pub fn is_damaged(&self) -> bool {
        self.truncated || self.decode_error.is_some()
    }
}

/// Decodes every command in the log at `path`, in order, and passes it to
/// `apply`. `apply` returns `false` for a command it does not recognize, which
/// is counted as skipped.
///
/// A missing file is an empty log. Undecodable bytes and a partial trailing
/// record end the replay without failing it.
pub fn replay<F>(path: impl AsRef<Path>, mut apply: F) -> Result<ReplayStats, PersistenceError>
where
    F: FnMut(Command) -> bool,
{
    let path = path.as_ref();
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No append-only log to replay");
            return Ok(ReplayStats::default());
        }
        Err(source) => {
            return Err(PersistenceError::Open {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut stats = ReplayStats::default();
    let mut parser = RespParser::new();
    let mut buffer = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        loop {
            match parser.parse(&buffer) {
                Ok(Some((frame, consumed))) => {
                    buffer.advance(consumed);
                    stats.valid_len += consumed as u64;
                    match Command::from_frame(frame) {
                        Ok(command) => {
                            if apply(command) {
                                stats.applied += 1;
                            } else {
                                stats.skipped += 1;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Skipping log record that is not a command");
                            stats.skipped += 1;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        applied = stats.applied,
                        "Undecodable append-only log record, stopping replay"
                    );
                    stats.decode_error = Some(e);
                    return Ok(stats);
                }
            }
        }

        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    if !buffer.is_empty() {
        warn!(
            path = %path.display(),
            trailing_bytes = buffer.len(),
            "Append-only log ends with a partial record, ignoring it"
        );
        stats.truncated = true;
    }

    Ok(stats)
}

/// Cuts the log at `path` back to the last whole record found by replay.
///
/// Appending after a torn or corrupt tail would bury every new record behind
/// bytes the next replay stops at, so this runs before the writer opens.
/// Returns the number of bytes dropped.
pub fn truncate_damaged_tail(
    path: impl AsRef<Path>,
    stats: &ReplayStats,
) -> Result<u64, PersistenceError> {
    if !stats.is_damaged() {
        return Ok(0);
    }

    let path = path.as_ref();
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|source| PersistenceError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let len = file.metadata()?.len();
    if len <= stats.valid_len {
        return Ok(0);
    }

    file.set_len(stats.valid_len)?;
    file.sync_all()?;

    let dropped = len - stats.valid_len;
    warn!(
        path = %path.display(),
        dropped_bytes = dropped,
        kept_bytes = stats.valid_len,
        "Truncated damaged tail of append-only log"
    );
    Ok(dropped)
}

/// Replays the log at `path` through `dispatcher`.
pub fn replay_into(
    path: impl AsRef<Path>,
    dispatcher: &Dispatcher,
) -> Result<ReplayStats, PersistenceError> {
    let path = path.as_ref();
    let stats = replay(path, |command| match dispatcher.execute(&command) {
        Some(result) => {
            if result.is_error() {
                debug!(command = %command.name, %result, "Replayed command returned an error");
            }
            true
        }
        None => {
            warn!(command = %command.name, "Unknown command in append-only log, skipping");
            false
        }
    })?;

    info!(
        path = %path.display(),
        applied = stats.applied,
        skipped = stats.skipped,
        truncated = stats.truncated,
        "Append-only log replayed"
    );
    Ok(stats)
}
