//! Server startup and accept loop.
//!
//! Startup order matters: the keyspace is rebuilt from the append-only log
//! before the listener binds, so no client ever sees a half-replayed state.
//! A damaged log tail is cut off after replay and before the writer opens.

use crate::commands::Dispatcher;
use crate::config::Config;
use crate::connection::{handle_connection, SharedState};
use crate::persistence::{replay_into, truncate_damaged_tail, AppendLog, FsyncPolicy, FsyncTask};
use crate::storage::{ExpiryConfig, ExpirySweeper, Keyspace};
use anyhow::Context;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

const FSYNC_INTERVAL: Duration = Duration::from_secs(1);

/// A bound server with its background tasks running.
pub struct Server {
    listener: TcpListener,
    state: SharedState,
    sweeper: ExpirySweeper,
    fsync: Option<FsyncTask>,
}

impl Server {
    /// Replays the log, starts background tasks and binds the listener.
    pub async fn bind(config: &Config) -> anyhow::Result<Self> {
        let keyspace = Arc::new(Keyspace::new());
        let dispatcher = Dispatcher::new(Arc::clone(&keyspace)).with_durable_ttl(config.durable_ttl);

        let (log, fsync) = if config.appendonly {
            let stats = replay_into(&config.aof_path, &dispatcher).with_context(|| {
                format!("failed to replay {}", config.aof_path.display())
            })?;
            truncate_damaged_tail(&config.aof_path, &stats).with_context(|| {
                format!("failed to repair {}", config.aof_path.display())
            })?;

            let log = AppendLog::open(&config.aof_path, config.appendfsync)?.into_shared();
            let fsync = (config.appendfsync == FsyncPolicy::EverySec)
                .then(|| FsyncTask::start(Arc::clone(&log), FSYNC_INTERVAL));
            info!(
                path = %config.aof_path.display(),
                fsync = ?config.appendfsync,
                durable_ttl = config.durable_ttl,
                "Append-only log enabled"
            );
            (Some(log), fsync)
        } else {
            warn!("Append-only log disabled, data will not survive a restart");
            (None, None)
        };

        let sweeper = ExpirySweeper::start(
            Arc::clone(&keyspace),
            ExpiryConfig {
                interval: config.sweep_interval(),
            },
        );

        let listener = TcpListener::bind(config.bind_address())
            .await
            .with_context(|| format!("failed to bind {}", config.bind_address()))?;
        info!(address = %listener.local_addr()?, "Listening");

        Ok(Self {
            listener,
            state: SharedState::new(dispatcher, log),
            sweeper,
            fsync,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Accepts clients until `shutdown` resolves, then stops background
    /// tasks and syncs the log.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let Self {
            listener,
            state,
            sweeper,
            fsync,
        } = self;

        tokio::select! {
            _ = accept_loop(&listener, &state) => {}
            _ = shutdown => info!("Shutdown signal received, stopping server"),
        }

        drop(listener);
        sweeper.stop();
        drop(fsync);

        if let Some(log) = &state.log {
            log.lock().await.sync().context("failed to sync append-only log")?;
            info!("Append-only log synced");
        }

        info!("Server shutdown complete");
        Ok(())
    }
}

async fn accept_loop(listener: &TcpListener, state: &SharedState) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(stream, addr, state.clone()));
            }
            Err(e) => error!(error = %e, "Failed to accept connection"),
        }
    }
}

async fn ctrl_c() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
}

/// Runs the server until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    Server::bind(&config).await?.serve(ctrl_c()).await
}
