/// Metrics and telemetry for Murmur
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Fan-out, back-fill and un-fan-out writes
/// - Feed reads and rate-limit rejections
/// - Storage failures and background jobs

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    /// Active HTTP requests
    pub static ref HTTP_REQUESTS_ACTIVE: IntGauge = register_int_gauge!(
        "http_requests_active",
        "Number of HTTP requests currently being processed"
    )
    .unwrap();

    // ========== Social Graph Metrics ==========

    /// Feed entries written when an event is created or re-enabled
    pub static ref FANOUT_WRITES_TOTAL: IntCounter = register_int_counter!(
        "fanout_writes_total",
        "Feed entries written by event fan-out"
    )
    .unwrap();

    /// Feed entries copied when a connection is confirmed
    pub static ref BACKFILL_COPIES_TOTAL: IntCounter = register_int_counter!(
        "backfill_copies_total",
        "Feed entries copied by connection back-fill"
    )
    .unwrap();

    /// Feed entries removed by event deletion or unfollow
    pub static ref UNFANOUT_REMOVALS_TOTAL: IntCounter = register_int_counter!(
        "unfanout_removals_total",
        "Feed entries removed by un-fan-out"
    )
    .unwrap();

    /// Connection transitions by operation
    pub static ref CONNECTION_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "connection_operations_total",
        "Connection engine operations",
        &["operation", "type"]
    )
    .unwrap();

    /// Feed reads by kind
    pub static ref FEED_READS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "feed_reads_total",
        "Feed reads by kind",
        &["kind"]
    )
    .unwrap();

    // ========== Rate Limiting ==========

    /// Requests rejected for exhausting their window
    pub static ref RATE_LIMIT_REJECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rate_limit_rejections_total",
        "Requests rejected by the rate limiter",
        &["tier"]
    )
    .unwrap();

    // ========== Background Jobs ==========

    /// Background job runs by job and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background jobs executed",
        &["job_type", "status"]
    )
    .unwrap();

    // ========== Error Metrics ==========

    /// Errors by error type
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "errors_total",
        "Total number of errors",
        &["error_type", "module"]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("render_metrics: encoding failed: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

pub fn record_fanout(writes: usize) {
    FANOUT_WRITES_TOTAL.inc_by(writes as u64);
}

pub fn record_backfill(copies: usize) {
    BACKFILL_COPIES_TOTAL.inc_by(copies as u64);
}

pub fn record_unfanout(removals: usize) {
    UNFANOUT_REMOVALS_TOTAL.inc_by(removals as u64);
}

/// Record a connection engine operation
pub fn record_connection_operation(operation: &str, connection_type: &str) {
    CONNECTION_OPERATIONS_TOTAL
        .with_label_values(&[operation, connection_type])
        .inc();
}

/// Record a feed read ("full", "unread" or "count")
pub fn record_feed_read(kind: &str) {
    FEED_READS_TOTAL.with_label_values(&[kind]).inc();
}

/// Record a rate-limited request
pub fn record_rate_limit_rejection(in_production: bool) {
    RATE_LIMIT_REJECTIONS_TOTAL
        .with_label_values(&[if in_production { "production" } else { "staging" }])
        .inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
}

/// Record an error
pub fn record_error(error_type: &str, module: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, module])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/user/feed", 200, 0.05);
        let metrics = render_metrics();
        assert!(metrics.contains("http_requests_total"));
        assert!(metrics.contains("http_request_duration_seconds"));
    }

    #[test]
    fn test_social_counters() {
        record_fanout(3);
        record_backfill(2);
        record_unfanout(1);
        record_connection_operation("confirm", "friend");
        let metrics = render_metrics();
        assert!(metrics.contains("fanout_writes_total"));
        assert!(metrics.contains("backfill_copies_total"));
        assert!(metrics.contains("unfanout_removals_total"));
        assert!(metrics.contains("connection_operations_total"));
    }

    #[test]
    fn test_rate_limit_and_feed_counters() {
        record_rate_limit_rejection(false);
        record_feed_read("unread");
        let metrics = render_metrics();
        assert!(metrics.contains("rate_limit_rejections_total"));
        assert!(metrics.contains("feed_reads_total"));
    }
}
