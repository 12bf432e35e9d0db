use std::net::SocketAddr;
use std::time::Instant;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations executed. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "hostel_operations_total";

/// Histogram: engine operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "hostel_operation_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: beds currently held by a live booking.
pub const BEDS_OCCUPIED: &str = "hostel_beds_occupied";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "hostel_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "hostel_wal_flush_batch_size";

/// Counter: notifier calls that failed and were dropped.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "hostel_notifications_failed_total";

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

/// Short status label for an operation outcome.
pub fn status_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(EngineError::Conflict(_)) => "conflict",
        Err(EngineError::NotFound(_) | EngineError::BookingNotFound(_)) => "not_found",
        Err(EngineError::InvalidAuthorization) => "unauthorized",
        Err(EngineError::StorageUnavailable(_) | EngineError::Internal(_)) => "error",
        Err(_) => "invalid",
    }
}

/// Record count and latency of one engine operation.
pub fn record_operation<T>(op: &'static str, started: Instant, result: &Result<T, EngineError>) {
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "status" => status_label(result)).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Coordinate;
    use ulid::Ulid;

    #[test]
    fn status_labels() {
        assert_eq!(status_label(&Ok::<(), EngineError>(())), "ok");
        assert_eq!(status_label::<()>(&Err(EngineError::Conflict(Ulid::new()))), "conflict");
        assert_eq!(status_label::<()>(&Err(EngineError::BookingNotFound(Ulid::new()))), "not_found");
        assert_eq!(status_label::<()>(&Err(EngineError::InvalidAuthorization)), "unauthorized");
        assert_eq!(
            status_label::<()>(&Err(EngineError::StorageUnavailable("disk".into()))),
            "error"
        );
        assert_eq!(
            status_label::<()>(&Err(EngineError::InvalidCoordinate(Coordinate::new(9, 9, 9)))),
            "invalid"
        );
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
