use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// How often the compactor checks the WAL append count.
pub const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Background task that moves sessions along their lifecycle: started
/// sessions go IN_PROGRESS, ended ones have their no-shows marked and
/// complete.
pub async fn run_sweeper(engine: Arc<Engine>) {
    let period = Duration::from_millis(engine.config().sweep_interval_ms.max(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let transitions = engine.sweep().await;
        if transitions > 0 {
            metrics::counter!(crate::observability::SWEEP_TRANSITIONS_TOTAL)
                .increment(transitions as u64);
            info!("sweeper: {transitions} transitions");
        }
    }
}

/// Background task that rewrites the WAL once `threshold` appends have
/// accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}
