//! Prometheus metrics for registration-service.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

/// Submissions by scholarship type, payment method and outcome.
pub static SUBMISSIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "registration_submissions_total",
        "Total number of registration submissions",
        &["scholarship_type", "method", "outcome"]
    )
    .expect("Failed to register submissions_total")
});

/// Gateway notifications by outcome (applied, duplicate, ignored, rejected).
pub static WEBHOOKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "registration_webhooks_total",
        "Total number of payment notifications processed",
        &["outcome"]
    )
    .expect("Failed to register webhooks_total")
});

pub static GATEWAY_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "registration_gateway_request_duration_seconds",
        "Outbound payment gateway and currency oracle call duration in seconds",
        &["operation"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register gateway_request_duration")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "registration_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Force registration so the series show up before the first event.
pub fn init_metrics() {
    Lazy::force(&SUBMISSIONS_TOTAL);
    Lazy::force(&WEBHOOKS_TOTAL);
    Lazy::force(&GATEWAY_REQUEST_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Render every registered metric, including the HTTP middleware series.
pub fn get_metrics() -> String {
    service_core::middleware::metrics::render()
}
