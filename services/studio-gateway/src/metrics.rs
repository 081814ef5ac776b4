//! Prometheus metrics exposition
//!
//! The recorder installed here also collects what the key-pool crate emits:
//!
//! - `genai_attempts_total` (counter): label `outcome`
//! - `genai_credential_transitions_total` (counter): label `to`
//! - `genai_backoff_seconds` (histogram)
//!
//! and adds the gateway's own:
//!
//! - `gateway_requests_total` (counter): labels `route`, `status`
//! - `gateway_request_duration_seconds` (histogram): label `route`
//! - `gateway_batch_results_total` (counter): label `result`

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Request latency buckets. Generations with failover can take minutes.
const DURATION_BUCKETS: &[f64] = &[
    0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

/// Backoff sleeps are 15s doubling per retry.
const BACKOFF_BUCKETS: &[f64] = &[1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 240.0, 480.0];

fn builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("gateway_request_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .and_then(|b| {
            b.set_buckets_for_metric(
                Matcher::Full("genai_backoff_seconds".to_string()),
                BACKOFF_BUCKETS,
            )
        })
        .context("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Histograms get explicit buckets so they render as Prometheus histograms
/// (with `_bucket` lines) rather than summaries.
pub fn install_recorder() -> Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Record a finished HTTP request.
pub fn record_request(route: &'static str, status: u16, duration_secs: f64) {
    metrics::counter!("gateway_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "route" => route)
        .record(duration_secs);
}

/// Record how many tasks of a batch produced a result.
pub fn record_batch_results(succeeded: usize, failed: usize) {
    metrics::counter!("gateway_batch_results_total", "result" => "succeeded")
        .increment(succeeded as u64);
    metrics::counter!("gateway_batch_results_total", "result" => "failed")
        .increment(failed as u64);
}
