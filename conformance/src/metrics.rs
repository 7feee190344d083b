//! Conformance run metrics

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    /// Conformance metrics registry
    pub static ref CONFORMANCE_METRICS_REGISTRY: Registry = Registry::new();

    /// Test body duration (executed tests only)
    static ref TEST_DURATION: HistogramVec = {
        let opts = HistogramOpts::new(
            "conformance_test_duration_seconds",
            "Conformance test duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]);
        let histogram = HistogramVec::new(opts, &["test"])
            .expect("Failed to create histogram");
        CONFORMANCE_METRICS_REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("Failed to register histogram");
        histogram
    };

    /// Test outcomes total
    static ref TEST_OUTCOMES_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "conformance_test_outcomes_total",
            "Total number of conformance test outcomes",
        );
        let counter = IntCounterVec::new(opts, &["test", "outcome"])
            .expect("Failed to create counter");
        CONFORMANCE_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Polling waits by result
    static ref POLL_WAITS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "conformance_poll_waits_total",
            "Total number of polling waits",
        );
        let counter = IntCounterVec::new(opts, &["kind", "result"])
            .expect("Failed to create counter");
        CONFORMANCE_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };
}

/// Record the outcome of a test, with its duration when the body ran
pub fn record_test_outcome(test: &str, outcome: &str, duration_secs: Option<f64>) {
    if let Some(duration_secs) = duration_secs {
        TEST_DURATION.with_label_values(&[test]).observe(duration_secs);
    }

    TEST_OUTCOMES_TOTAL
        .with_label_values(&[test, outcome])
        .inc();
}

/// Record the end of a polling wait
pub fn record_poll_wait(kind: &str, result: &str) {
    POLL_WAITS_TOTAL.with_label_values(&[kind, result]).inc();
}

/// Gather conformance metrics in the Prometheus text format
pub fn gather_conformance_metrics() -> Result<String, String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = CONFORMANCE_METRICS_REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert to UTF-8: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_test_outcome() {
        record_test_outcome("MetricsProbeTest", "Succeeded", Some(0.25));
        record_test_outcome("MetricsProbeSkipped", "Skipped", None);

        let metrics = gather_conformance_metrics().expect("Should gather metrics");
        assert!(metrics.contains("conformance_test_outcomes_total"));
        assert!(metrics.contains("MetricsProbeTest"));
        assert!(metrics.contains("conformance_test_duration_seconds"));
    }

    #[test]
    fn test_record_poll_wait() {
        record_poll_wait("HTTPRoute", "timeout");

        let metrics = gather_conformance_metrics().expect("Should gather metrics");
        assert!(metrics.contains("conformance_poll_waits_total"));
    }
}
