use crate::handlers::AppState;
use crate::services::IngestionReport;
use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const REQUESTS_TOTAL: &str = "api_requests_total";
pub const REQUEST_DURATION: &str = "api_request_duration_seconds";
pub const INGESTION_DURATION: &str = "ingestion_duration_seconds";
pub const INGESTED_METRICS_TOTAL: &str = "ingested_metrics_total";
pub const EXPORT_DURATION: &str = "export_duration_seconds";
pub const EXPORTED_METRICS_TOTAL: &str = "exported_metrics_total";

/// Prometheus default histogram buckets, in seconds.
const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Exporter builder with histogram buckets for every duration metric.
pub fn prometheus_builder() -> Result<PrometheusBuilder, BuildError> {
    let mut builder = PrometheusBuilder::new();
    for name in [REQUEST_DURATION, INGESTION_DURATION, EXPORT_DURATION] {
        builder = builder.set_buckets_for_metric(Matcher::Full(name.to_string()), &DEFAULT_BUCKETS)?;
    }
    Ok(builder)
}

/// Install the process-wide recorder. Call once, from `main`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = prometheus_builder()?.install_recorder()?;
    describe_metrics();
    tracing::info!("Prometheus metrics initialized");
    Ok(handle)
}

fn describe_metrics() {
    metrics::describe_counter!(REQUESTS_TOTAL, "Total requests received per endpoint and method");
    metrics::describe_histogram!(REQUEST_DURATION, "Request duration per endpoint in seconds");
    metrics::describe_histogram!(INGESTION_DURATION, "Ingestion pass duration in seconds");
    metrics::describe_counter!(INGESTED_METRICS_TOTAL, "Enriched metrics written by ingestion");
    metrics::describe_histogram!(EXPORT_DURATION, "Sink export duration in seconds");
    metrics::describe_counter!(EXPORTED_METRICS_TOTAL, "Enriched metrics delivered to the sink");
}

/// `GET /metrics` rendering the given handle.
pub fn metrics_routes(handle: PrometheusHandle) -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(move || std::future::ready(handle.render())))
}

/// Route-layer middleware counting and timing each request by matched route.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let method = request.method().to_string();

    let started = Instant::now();
    let response = next.run(request).await;
    record_request(&endpoint, &method, started.elapsed());

    response
}

pub fn record_request(endpoint: &str, method: &str, elapsed: Duration) {
    metrics::counter!(REQUESTS_TOTAL,
        "endpoint" => endpoint.to_string(),
        "method" => method.to_string()
    )
    .increment(1);
    metrics::histogram!(REQUEST_DURATION, "endpoint" => endpoint.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_ingestion(report: &IngestionReport) {
    metrics::histogram!(INGESTION_DURATION).record(report.elapsed.as_secs_f64());
    metrics::counter!(INGESTED_METRICS_TOTAL).increment(report.metrics_saved as u64);
}

pub fn record_export(count: usize, elapsed: Duration) {
    metrics::histogram!(EXPORT_DURATION).record(elapsed.as_secs_f64());
    metrics::counter!(EXPORTED_METRICS_TOTAL).increment(count as u64);
}
