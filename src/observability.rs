use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: appointments committed.
pub const APPOINTMENTS_CREATED_TOTAL: &str = "roombook_appointments_created_total";

/// Counter: appointments updated.
pub const APPOINTMENTS_UPDATED_TOTAL: &str = "roombook_appointments_updated_total";

/// Counter: appointments deleted.
pub const APPOINTMENTS_DELETED_TOTAL: &str = "roombook_appointments_deleted_total";

/// Counter: bookings rejected because the room slot was taken.
pub const ROOM_CONFLICTS_TOTAL: &str = "roombook_room_conflicts_total";

/// Counter: bookings rejected because a resource window was taken.
pub const RESOURCE_CONFLICTS_TOTAL: &str = "roombook_resource_conflicts_total";

/// Counter: mutations rejected by the access control policy.
pub const FORBIDDEN_TOTAL: &str = "roombook_forbidden_total";

/// Histogram: booking mutation latency in seconds.
pub const BOOKING_DURATION_SECONDS: &str = "roombook_booking_duration_seconds";

/// Install the fmt tracing subscriber. Call once at process start.
pub fn init_logging() {
    tracing_subscriber::fmt::init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
