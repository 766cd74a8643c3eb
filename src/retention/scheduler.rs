//! Periodic cleanup and queue rescans for the daemon.

use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{bridge::DeletionQueueBridge, engine::RetentionEngine, settings::SharedSettings};
use crate::{config::SchedulerConfig, observability::metrics};

/// Re-reads retention rules from the config file before each scheduled job.
pub struct SettingsReloader {
    pub settings: Arc<SharedSettings>,
    pub path: PathBuf,
}

impl SettingsReloader {
    fn reload(&self) {
        match self.settings.reload_from_file(&self.path) {
            Ok(true) => tracing::info!(path = %self.path.display(), "Retention settings reloaded"),
            Ok(false) => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to reload retention settings, keeping current ones"
            ),
        }
    }
}

fn interval_for(secs: u64) -> tokio::time::Interval {
    // A disabled job still needs a valid period; its branch is never polled
    let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Starts the cleanup scheduler.
///
/// Runs `run_cleanup` every `cleanup_interval_secs` and `enqueue_all` every
/// `rescan_interval_secs`, both starting immediately. A zero interval
/// disables that job. Returns when `cancel` is triggered; a job in progress
/// is finished first.
pub async fn start_cleanup_scheduler(
    engine: Arc<RetentionEngine>,
    bridge: Arc<DeletionQueueBridge>,
    reloader: Option<SettingsReloader>,
    config: SchedulerConfig,
    cancel: CancellationToken,
) {
    let cleanup_enabled = config.cleanup_interval_secs > 0;
    let rescan_enabled = config.rescan_interval_secs > 0;

    if !cleanup_enabled && !rescan_enabled {
        tracing::info!("Cleanup scheduler disabled by configuration");
        return;
    }

    tracing::info!(
        cleanup_interval_secs = config.cleanup_interval_secs,
        rescan_interval_secs = config.rescan_interval_secs,
        reload_settings = reloader.is_some(),
        "Starting cleanup scheduler"
    );

    let mut cleanup = interval_for(config.cleanup_interval_secs);
    let mut rescan = interval_for(config.rescan_interval_secs);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = cleanup.tick(), if cleanup_enabled => {
                if let Some(reloader) = &reloader {
                    reloader.reload();
                }
                run_cleanup_job(&engine).await;
            }
            _ = rescan.tick(), if rescan_enabled => {
                if let Some(reloader) = &reloader {
                    reloader.reload();
                }
                run_rescan_job(&bridge).await;
            }
        }
    }

    tracing::info!("Cleanup scheduler stopped");
}

async fn run_cleanup_job(engine: &RetentionEngine) {
    let result = engine.run_cleanup().await;

    if result.has_deletions() || result.has_failures() || result.budget_exhausted {
        tracing::info!(
            attempted = result.attempted,
            deleted = result.deleted,
            not_found = result.not_found,
            failed = result.failed,
            conflicts = result.conflicts,
            budget_exhausted = result.budget_exhausted,
            dry_run = result.dry_run,
            duration_ms = result.duration.as_millis() as u64,
            "Revision cleanup run complete"
        );
    } else {
        tracing::debug!("Revision cleanup run complete, nothing to delete");
    }
}

async fn run_rescan_job(bridge: &DeletionQueueBridge) {
    if let Err(e) = bridge.enqueue_all().await {
        tracing::error!(error = %e, "Failed to rebuild revision deletion queue");
        metrics::record_cleanup_error("rescan");
    }
}
