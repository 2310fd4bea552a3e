//! Background Expiry Sweeper
//!
//! GET removes expired keys lazily, but a key that is never read again, and
//! every expired hash, would otherwise stay in memory forever. The sweeper is a
//! Tokio task that wakes on a fixed interval and calls
//! [`Keyspace::purge_expired`], which takes the store locks in the same order
//! as every command handler.

use crate::storage::keyspace::{unix_now, Keyspace};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Time between sweeps
    pub interval: Duration,
}

/// Handle to the running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper onto the current Tokio runtime.
    pub fn start(keyspace: Arc<Keyspace>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(interval_ms = config.interval.as_millis() as u64, "Expiry sweeper started");
        tokio::spawn(sweeper_loop(keyspace, config, shutdown_rx));

        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    keyspace: Arc<Keyspace>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper stopped");
                    return;
                }
            }
        }

        let removed = keyspace.purge_expired(unix_now());
        if removed > 0 {
            debug!(removed, "Expired keys swept");
        } else {
            trace!("Sweep found nothing to expire");
        }
    }
}
