use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "convene_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "convene_query_duration_seconds";

// ── Scheduling ──────────────────────────────────────────────────

/// Counter: meetings persisted.
pub const MEETINGS_CREATED_TOTAL: &str = "convene_meetings_created_total";

/// Counter: creations rejected because a participant was already booked.
pub const CONFLICTS_TOTAL: &str = "convene_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "convene_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "convene_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "convene_connections_rejected_total";

/// Gauge: number of open tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "convene_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "convene_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "convene_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertMeetings { .. } => "insert_meetings",
        Command::SelectById { .. } => "select_by_id",
        Command::SelectByParticipant { .. } => "select_by_participant",
        Command::SelectByTimeRange { .. } => "select_by_time_range",
    }
}
