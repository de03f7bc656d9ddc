//! Active Expiry
//!
//! Lazy reclamation removes an expired key only when an operation names it.
//! A key that expires and is never looked at again would keep its slot in the
//! keyspace and in the recency list, and would count against `max_keys`. The
//! [`ExpirySweeper`] runs [`StorageEngine::sweep_expired`] on a timer so those
//! keys go away on their own.
//!
//! The pause between sweeps adapts to the workload:
//!
//! ```text
//!   swept / population > speedup_threshold   ──>  pause / 2   (floor: min_interval)
//!   nothing swept                             ──>  pause * 2   (cap:   max_interval)
//!   otherwise                                 ──>  unchanged
//! ```

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Timing knobs for the sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Pause before the first sweep.
    pub base_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Share of the keyspace that must be swept in one pass to halve the pause.
    pub speedup_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
        }
    }
}

impl ExpiryConfig {
    /// Pause to use after a sweep that removed `swept` of `population` keys.
    pub fn next_interval(&self, current: Duration, swept: usize, population: usize) -> Duration {
        if swept == 0 {
            return (current * 2).min(self.max_interval);
        }
        let ratio = swept as f64 / population.max(1) as f64;
        if ratio > self.speedup_threshold {
            (current / 2).max(self.min_interval)
        } else {
            current
        }
    }
}

/// Handle to the running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current tokio runtime.
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            base_ms = config.base_interval.as_millis() as u64,
            "Background expiry sweeper started"
        );
        tokio::spawn(sweep_loop(engine, config, shutdown_rx));

        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut pause = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper shutting down");
                    return;
                }
            }
        }

        let population = engine.len();
        let swept = engine.sweep_expired();
        let next = config.next_interval(pause, swept, population);

        if swept > 0 {
            debug!(
                swept,
                remaining = engine.len(),
                pause_ms = next.as_millis() as u64,
                "Swept expired keys"
            );
        } else if next != pause {
            trace!(pause_ms = next.as_millis() as u64, "Sweeper backing off");
        }
        pause = next;
    }
}

/// Starts a sweeper with [`ExpiryConfig::default`].
pub fn start_expiry_sweeper(engine: Arc<StorageEngine>) -> ExpirySweeper {
    ExpirySweeper::start(engine, ExpiryConfig::default())
}
