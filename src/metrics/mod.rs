use metrics::{counter, histogram, Counter, Histogram};
use once_cell::sync::Lazy;

pub struct LoggerMetrics {
    pub success_events_total: Counter,
    pub error_events_total: Counter,
    pub body_drain_failures_total: Counter,
    pub captured_body_bytes: Histogram,
}

pub static LOGGER_METRICS: Lazy<LoggerMetrics> = Lazy::new(|| LoggerMetrics {
    success_events_total: counter!("request_logger_success_events_total"),
    error_events_total: counter!("request_logger_error_events_total"),
    body_drain_failures_total: counter!("request_logger_body_drain_failures_total"),
    captured_body_bytes: histogram!("request_logger_captured_body_bytes"),
});

pub fn record_success_event() {
    LOGGER_METRICS.success_events_total.increment(1);
}

pub fn record_error_event() {
    LOGGER_METRICS.error_events_total.increment(1);
}

pub fn record_drain_failure() {
    LOGGER_METRICS.body_drain_failures_total.increment(1);
}

/// Request and response body bytes held in memory for one exchange.
pub fn record_captured_bytes(bytes: usize) {
    LOGGER_METRICS.captured_body_bytes.record(bytes as f64);
}
