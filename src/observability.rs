use std::net::SocketAddr;

// ── Booking ─────────────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "sched_bookings_total";

/// Counter: appointments moved to CANCELLED (repeat cancels not counted).
pub const CANCELLATIONS_TOTAL: &str = "sched_cancellations_total";

// ── Slot compiler ───────────────────────────────────────────────

/// Counter: slot queries. Labels: view.
pub const SLOT_QUERIES_TOTAL: &str = "sched_slot_queries_total";

/// Histogram: slot query latency in seconds. Labels: view.
pub const SLOT_QUERY_DURATION_SECONDS: &str = "sched_slot_query_duration_seconds";

// ── Delivery ────────────────────────────────────────────────────

/// Counter: outbox events marked processed by the pump.
pub const OUTBOX_PROCESSED_TOTAL: &str = "sched_outbox_processed_total";

/// Gauge: live notification subscribers across all patients.
pub const NOTIFY_SUBSCRIBERS: &str = "sched_notify_subscribers";

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

/// Label for a booking failure, or "ok".
pub fn booking_outcome<T>(result: &Result<T, crate::engine::EngineError>) -> &'static str {
    use crate::engine::{ConflictReason, EngineError};
    match result {
        Ok(_) => "ok",
        Err(EngineError::Conflict(ConflictReason::OutsideAvailability)) => "outside_availability",
        Err(EngineError::Conflict(ConflictReason::OverbookingLimit)) => "overbooked",
        Err(EngineError::Conflict(ConflictReason::SlotUnavailable)) => "unavailable",
        Err(EngineError::NotFound(..)) => "not_found",
        Err(EngineError::InvalidArgument(_) | EngineError::LimitExceeded(_)) => "invalid",
        Err(EngineError::Store(_) | EngineError::Outbox(_)) => "error",
    }
}
