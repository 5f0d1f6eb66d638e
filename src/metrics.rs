use axum::{routing::get, Router};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::future::ready;

// Creates a new Axum Router for the /metrics endpoint.
// This endpoint will expose metrics in the Prometheus format.
pub fn metrics_router() -> Router {
    let recorder_handle = setup_metrics_recorder();
    Router::new().route("/metrics", get(move || ready(recorder_handle.render())))
}

// Sets up the Prometheus recorder with buckets sized for firmware downloads,
// which run from sub-second skips to multi-minute archive fetches.
fn setup_metrics_recorder() -> PrometheusHandle {
    const DURATION_SECONDS: &[f64] = &[
        0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("firmware_sync_duration_seconds".to_string()),
            DURATION_SECONDS,
        )
        .unwrap()
        .install_recorder()
        .unwrap()
}
