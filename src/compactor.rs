use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::storage::Store;

/// Background task that rewrites the WAL once `threshold` appends have piled up
/// since the last compaction. Checks every `every` until `shutdown` fires.
pub async fn run_compactor(
    store: Arc<Store>,
    threshold: u64,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let appends = store.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact_wal().await {
            Ok(events) => info!("compacted wal: {appends} appends folded into {events} events"),
            Err(e) => tracing::error!("wal compaction failed: {e}"),
        }
    }
    tracing::debug!("compactor stopped");
}
