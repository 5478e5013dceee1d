use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservation attempts. Labels: status (committed, unavailable, invalid, error).
pub const RESERVATIONS_TOTAL: &str = "bookings_reservations_total";

/// Counter: cancelled reservations.
pub const CANCELLATIONS_TOTAL: &str = "bookings_cancellations_total";

/// Histogram: check-and-commit latency in seconds, lock wait included.
pub const COMMIT_DURATION_SECONDS: &str = "bookings_commit_duration_seconds";

/// Histogram: multi-room search latency in seconds.
pub const SEARCH_DURATION_SECONDS: &str = "bookings_search_duration_seconds";

/// Counter: notifications handled by the dispatcher. Labels: status (sent, failed, dropped).
pub const NOTIFICATIONS_TOTAL: &str = "bookings_notifications_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: rooms in the catalog.
pub const ROOMS_ACTIVE: &str = "bookings_rooms_active";

/// Gauge: notifications waiting in the dispatcher queue.
pub const NOTIFICATION_QUEUE_DEPTH: &str = "bookings_notification_queue_depth";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookings_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookings_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Label for a failed reservation attempt.
pub fn failure_label(err: &crate::error::BookingError) -> &'static str {
    use crate::error::BookingError::*;
    match err {
        RoomUnavailable { .. } => "unavailable",
        InvalidRange | InvalidGuest(_) | LimitExceeded(_) => "invalid",
        RoomNotFound(_) => "not_found",
        StorageTimeout => "timeout",
        _ => "error",
    }
}
