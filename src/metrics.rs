//! Prometheus metrics for the security engine and the HTTP surface.

use axum::{
    extract::{MatchedPath, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};
use std::time::Instant;

/// Requests evaluated by the zero-trust engine, by outcome.
pub static REQUESTS_EVALUATED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fortress_requests_evaluated_total",
        "Requests evaluated by the zero-trust engine",
        &["outcome"]
    )
    .expect("failed to register requests_evaluated_total")
});

/// Denials by machine-readable reason code.
pub static DENIALS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fortress_denials_total",
        "Request denials by reason code",
        &["reason"]
    )
    .expect("failed to register denials_total")
});

/// Completed scans by verdict.
pub static SCANS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fortress_scans_total",
        "Completed scans by verdict",
        &["status"]
    )
    .expect("failed to register scans_total")
});

pub static SCAN_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "fortress_scan_duration_seconds",
        "End-to-end scan duration in seconds",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0]
    )
    .expect("failed to register scan_duration_seconds")
});

/// External analyzers killed for exceeding their budget, by tool.
pub static ANALYZER_TIMEOUTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fortress_analyzer_timeouts_total",
        "External analyzer timeouts by tool",
        &["tool"]
    )
    .expect("failed to register analyzer_timeouts_total")
});

pub static INTEL_REFRESHES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "fortress_intel_refreshes_total",
        "Threat-intelligence refresh runs"
    )
    .expect("failed to register intel_refreshes_total")
});

pub static SECURITY_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fortress_security_events_total",
        "Security events recorded, by type",
        &["event_type"]
    )
    .expect("failed to register security_events_total")
});

pub static QUARANTINE_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "fortress_quarantine_size",
        "Entries currently in the quarantine set"
    )
    .expect("failed to register quarantine_size")
});

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fortress_http_requests_total",
        "HTTP requests by method, path, and status",
        &["method", "path", "status"]
    )
    .expect("failed to register http_requests_total")
});

static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fortress_http_request_duration_seconds",
        "HTTP request duration by path",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .expect("failed to register http_request_duration")
});

/// Axum middleware recording request counts and latency per matched route.
pub async fn track_http_metrics(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path])
        .observe(started.elapsed().as_secs_f64());
    response
}

/// `GET /metrics` handler: the default registry in Prometheus text format.
pub async fn metrics_handler() -> impl IntoResponse {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to encode metrics".to_string(),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}
