//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with standardized naming conventions for the
//! report-generation pipeline.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all ReportCraft metrics
pub const METRICS_PREFIX: &str = "reportcraft";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, // 1ms
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
];

/// Buckets for chapter generation latency (LLM calls are slow)
pub const GENERATION_BUCKETS: &[f64] = &[
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
    120.0,  // 2m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Dispatch metrics
    describe_counter!(
        format!("{}_reports_dispatched_total", METRICS_PREFIX),
        Unit::Count,
        "Total reports dispatched for generation"
    );

    describe_counter!(
        format!("{}_chapter_jobs_enqueued_total", METRICS_PREFIX),
        Unit::Count,
        "Total chapter jobs enqueued"
    );

    describe_counter!(
        format!("{}_dispatch_config_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Dispatches hitting catalog configuration errors (zero chapters, missing prompt)"
    );

    // Chapter worker metrics
    describe_counter!(
        format!("{}_chapters_generated_total", METRICS_PREFIX),
        Unit::Count,
        "Total chapters generated and persisted"
    );

    describe_counter!(
        format!("{}_chapter_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Total chapter jobs that failed (left for queue redelivery)"
    );

    describe_counter!(
        format!("{}_duplicate_deliveries_total", METRICS_PREFIX),
        Unit::Count,
        "Chapter jobs redelivered after their chapter row already existed"
    );

    describe_counter!(
        format!("{}_reports_completed_total", METRICS_PREFIX),
        Unit::Count,
        "Reports that reached the completed status"
    );

    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Chapter generation (LLM call) latency in seconds"
    );

    // Database metrics
    describe_gauge!(
        format!("{}_db_connections_active", METRICS_PREFIX),
        Unit::Count,
        "Active database connections"
    );

    // Queue metrics
    describe_counter!(
        format!("{}_queue_messages_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Total queue messages processed"
    );

    describe_counter!(
        format!("{}_queue_poison_messages_total", METRICS_PREFIX),
        Unit::Count,
        "Malformed queue messages dropped before processing"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record a dispatch fan-out
pub fn record_dispatch(jobs_enqueued: usize) {
    counter!(format!("{}_reports_dispatched_total", METRICS_PREFIX)).increment(1);
    counter!(format!("{}_chapter_jobs_enqueued_total", METRICS_PREFIX))
        .increment(jobs_enqueued as u64);
}

/// Record a catalog configuration error observed at dispatch time
pub fn record_dispatch_config_error(kind: &'static str) {
    counter!(
        format!("{}_dispatch_config_errors_total", METRICS_PREFIX),
        "kind" => kind
    )
    .increment(1);
}

/// Record the outcome of one chapter generation call
pub fn record_generation(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_chapters_generated_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_generation_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(format!("{}_chapter_failures_total", METRICS_PREFIX)).increment(1);
    }
}

/// Record a duplicate job delivery treated as a no-op success
pub fn record_duplicate_delivery() {
    counter!(format!("{}_duplicate_deliveries_total", METRICS_PREFIX)).increment(1);
}

/// Record a report reaching the completed status
pub fn record_report_completed() {
    counter!(format!("{}_reports_completed_total", METRICS_PREFIX)).increment(1);
}

/// Record a malformed queue message being dropped
pub fn record_poison_message() {
    counter!(format!("{}_queue_poison_messages_total", METRICS_PREFIX)).increment(1);
}

/// Record one consumed queue message by outcome
pub fn record_queue_message(outcome: &'static str) {
    counter!(
        format!("{}_queue_messages_processed_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}
