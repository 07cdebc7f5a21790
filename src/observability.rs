use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "chairbook_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "chairbook_http_request_duration_seconds";

// ── Booking domain ──────────────────────────────────────────────

/// Counter: bookings created. Labels: assignment (explicit, round_robin).
pub const BOOKINGS_CREATED_TOTAL: &str = "chairbook_bookings_created_total";

/// Counter: bookings canceled. Labels: actor.
pub const BOOKINGS_CANCELED_TOTAL: &str = "chairbook_bookings_canceled_total";

/// Counter: create, reschedule and block attempts rejected for overlapping an occupied slot.
pub const BOOKING_CONFLICTS_TOTAL: &str = "chairbook_booking_conflicts_total";

/// Counter: time blocks placed on professionals' schedules.
pub const TIME_BLOCKS_TOTAL: &str = "chairbook_time_blocks_total";

/// Counter: client cancellations refused by the notice deadline.
pub const CANCELLATIONS_REFUSED_TOTAL: &str = "chairbook_cancellations_refused_total";

// ── Notifications ───────────────────────────────────────────────

/// Counter: webhook attempts. Labels: sink, event, status.
pub const WEBHOOK_DELIVERIES_TOTAL: &str = "chairbook_webhook_deliveries_total";

/// Histogram: webhook round trip in seconds. Labels: sink.
pub const WEBHOOK_DURATION_SECONDS: &str = "chairbook_webhook_duration_seconds";

/// Counter: sweep dispatches skipped because the ledger already held a claim.
pub const LEDGER_SKIPS_TOTAL: &str = "chairbook_ledger_skips_total";

/// Counter: sweep runs. Labels: kind (reminders, no_shows).
pub const SWEEP_RUNS_TOTAL: &str = "chairbook_sweep_runs_total";

/// Histogram: sweep duration in seconds. Labels: kind.
pub const SWEEP_DURATION_SECONDS: &str = "chairbook_sweep_duration_seconds";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "chairbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "chairbook_wal_flush_batch_size";

/// Counter: journal compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "chairbook_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
