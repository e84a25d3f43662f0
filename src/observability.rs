use std::net::SocketAddr;

use crate::engine::TakeOutcome;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: take requests. Labels: outcome.
pub const TAKES_TOTAL: &str = "stagebook_takes_total";

/// Counter: return requests. Labels: outcome (returned, refused).
pub const RETURNS_TOTAL: &str = "stagebook_returns_total";

/// Histogram: engine operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "stagebook_operation_duration_seconds";

// ── Expiry sweep ────────────────────────────────────────────────

/// Counter: expired bookings removed by the sweeper.
pub const SWEPT_EXPIRED_TOTAL: &str = "stagebook_swept_expired_total";

/// Counter: expiring-soon notices published by the sweeper.
pub const EXPIRING_NOTICES_TOTAL: &str = "stagebook_expiring_notices_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "stagebook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "stagebook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label of a take outcome for metrics.
pub fn take_label(outcome: &TakeOutcome) -> &'static str {
    match outcome {
        TakeOutcome::Taken { .. } => "taken",
        TakeOutcome::Conflict { .. } => "conflict",
        TakeOutcome::UnknownResource => "unknown_resource",
        TakeOutcome::UnknownVisitor => "unknown_visitor",
    }
}
