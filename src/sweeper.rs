//! # Orphan Sweeper
//!
//! Background task that periodically force-fails sync runs stuck in
//! `pending`/`running` past the configured threshold. It only touches the
//! bookkeeping rows; an in-flight connector call is not cancelled.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::SyncRunConfig;
use crate::lifecycle::LifecycleRecorder;

/// Background orphan sweep service.
pub struct OrphanSweeper {
    recorder: LifecycleRecorder,
    threshold: Duration,
    interval: Duration,
}

impl OrphanSweeper {
    pub fn new(recorder: LifecycleRecorder, config: &SyncRunConfig) -> Self {
        Self {
            recorder,
            threshold: config.orphan_threshold(),
            interval: config.sweep_interval(),
        }
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            threshold_secs = self.threshold.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Starting orphan sweeper"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Orphan sweeper shutdown requested");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.tick().await;
                }
            }
        }
    }

    /// One sweep pass; returns the number of runs finalized.
    pub async fn tick(&self) -> u64 {
        match self.recorder.sweep_orphaned_runs(self.threshold).await {
            Ok(count) => {
                debug!(swept = count, "Orphan sweep finished");
                count
            }
            Err(err) => {
                error!(error = %err, "Orphan sweep failed");
                0
            }
        }
    }
}
