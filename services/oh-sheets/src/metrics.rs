//! Prometheus metrics exposition
//!
//! Request-level metrics are recorded here; the library crates record
//! their own counters through the same global recorder:
//!
//! - `oh_sheets_requests_total` (counter): labels `route`, `status`
//! - `oh_sheets_request_duration_seconds` (histogram): label `route`
//! - `oh_sheets_upstream_calls_total` (counter, integrations crate)
//! - `oh_sheets_token_refresh_total` (counter, credential-manager crate)

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("oh_sheets_request_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
///
/// Duration is configured with explicit buckets so it renders as a
/// histogram (`_bucket` lines) rather than a summary.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed request against its matched route.
pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "oh_sheets_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("oh_sheets_request_duration_seconds", "route" => route.to_string())
        .record(duration_secs);
}

#[cfg(test)]
pub(crate) fn isolated_recorder() -> (metrics_exporter_prometheus::PrometheusRecorder, PrometheusHandle) {
    let recorder = builder()
        .expect("failed to set histogram buckets")
        .build_recorder();
    let handle = recorder.handle();
    (recorder, handle)
}
