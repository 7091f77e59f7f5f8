//! Retention sweep for finished jobs.
//!
//! The registry is unbounded; this background task keeps it from growing
//! forever by evicting terminal jobs whose results have aged out. Running
//! jobs are never touched.

use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::info;

use crate::registry::JobRegistry;

/// Configuration for the retention sweep.
#[derive(Clone)]
pub struct RetentionConfig {
    /// How long finished jobs remain queryable, in hours.
    pub retention_hours: u64,
    /// How often to sweep, in seconds.
    pub interval_secs: u64,
}

/// Start the retention background task.
///
/// Spawns a tokio task that periodically evicts terminal jobs older than
/// the retention period. Evicted jobs answer status queries with the
/// `not_found` sentinel from then on.
pub fn start_retention_task(registry: JobRegistry, config: RetentionConfig) {
    tokio::spawn(async move {
        info!(
            "Starting job retention sweep (retention: {} hours, interval: {} seconds)",
            config.retention_hours, config.interval_secs
        );

        let mut ticker = interval(Duration::from_secs(config.interval_secs));

        loop {
            ticker.tick().await;
            run_sweep(&registry, &config);
        }
    });
}

/// Run a single sweep cycle.
fn run_sweep(registry: &JobRegistry, config: &RetentionConfig) {
    let cutoff = Utc::now() - chrono::Duration::hours(config.retention_hours as i64);
    let evicted = registry.evict_terminal_older_than(cutoff);
    if evicted > 0 {
        info!(
            "Job retention sweep: evicted {} finished job(s), {} remaining",
            evicted,
            registry.job_count()
        );
    }
}
