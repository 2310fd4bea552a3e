//! Command-line configuration.

use crate::persistence::FsyncPolicy;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_AOF_PATH: &str = "database.aof";
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;

#[derive(Parser, Debug, Clone)]
#[command(name = "tallykv", author, version, about = "In-memory key-value server speaking RESP", long_about = None)]
pub struct Config {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Append-only log file
    #[arg(long, default_value = DEFAULT_AOF_PATH)]
    pub aof_path: PathBuf,

    /// Record mutating commands in the append-only log (yes|no)
    #[arg(long, default_value = "yes", value_parser = parse_yes_no, action = ArgAction::Set)]
    pub appendonly: bool,

    /// When the log is synced to disk
    #[arg(long, value_enum, default_value_t = FsyncPolicy::EverySec)]
    pub appendfsync: FsyncPolicy,

    /// Also log EXPIRE/EXPIREAT/PERSIST and write TTLs as absolute deadlines
    #[arg(long)]
    pub durable_ttl: bool,

    /// Milliseconds between background expiry sweeps
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL_MS, value_parser = clap::value_parser!(u64).range(1..))]
    pub sweep_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            aof_path: PathBuf::from(DEFAULT_AOF_PATH),
            appendonly: true,
            appendfsync: FsyncPolicy::default(),
            durable_ttl: false,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn parse_yes_no(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(format!("expected yes or no, got '{}'", other)),
    }
}
