//! Prometheus metrics for the mock server.
//!
//! Metrics are process global. They are exposed by the server on the
//! reserved `/__mocha/metrics` path when enabled in the configuration.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec, Encoder,
    HistogramVec, IntCounter, TextEncoder,
};

lazy_static! {
    /// Requests by dispatch outcome
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "mocha_requests_total",
        "Total number of requests handled by the mock server",
        &["outcome"]  // matched|no_match|proxied|error|panic
    )
    .unwrap();

    /// Responses served per mock
    pub static ref MOCK_HITS_TOTAL: CounterVec = register_counter_vec!(
        "mocha_mock_hits_total",
        "Total number of responses served per mock",
        &["mock"]
    )
    .unwrap();

    /// Time spent dispatching a request, delay included
    pub static ref DISPATCH_DURATION_MS: HistogramVec = register_histogram_vec!(
        "mocha_dispatch_duration_ms",
        "Histogram of request dispatch time in milliseconds",
        &["outcome"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0, 5000.0]
    )
    .unwrap();

    /// Recordings dropped because the queue was full
    pub static ref RECORDER_DROPPED_TOTAL: IntCounter = register_int_counter!(
        "mocha_recorder_dropped_total",
        "Total number of recorded exchanges dropped because the queue was full"
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_request(outcome: &str, duration_ms: f64) {
    REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
    DISPATCH_DURATION_MS
        .with_label_values(&[outcome])
        .observe(duration_ms);
}

pub fn record_mock_hit(mock: &str) {
    MOCK_HITS_TOTAL.with_label_values(&[mock]).inc();
}

pub fn record_recorder_drop() {
    RECORDER_DROPPED_TOTAL.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_contains_recorded_series() {
        record_request("matched", 1.5);
        record_mock_hit("metrics-test");
        record_recorder_drop();
        let text = collect_metrics();
        assert!(text.contains("mocha_requests_total"));
        assert!(text.contains("mock=\"metrics-test\""));
        assert!(text.contains("mocha_recorder_dropped_total"));
    }
}
