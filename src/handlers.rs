use crate::config::Config;
use crate::errors::AppError;
use crate::models::*;
use crate::services::{ExportOutcome, PipelineService};
use crate::telemetry;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde_json::json;
use std::sync::Arc;

const DEFAULT_LIMIT: &str = "10";
const DEFAULT_OFFSET: &str = "0";

/// Shared application state injected into handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Ingestion, storage and export pipeline.
    pub pipeline: PipelineService,
}

/// Liveness and readiness probes.
pub fn probe_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

/// Ingestion, query and export endpoints, counted and timed per route.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ingest/run", post(run_ingestion))
        .route("/metrics/channel", get(get_metrics_by_channel))
        .route("/metrics/funnel", get(get_metrics_by_funnel))
        .route("/export/run", post(run_export))
        .route_layer(middleware::from_fn(telemetry::track_requests))
}

/// GET /healthz
pub async fn healthz() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// GET /readyz
///
/// Ready as long as the metric store can be read.
pub async fn readyz(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    state.pipeline.check_ready()?;
    Ok((StatusCode::OK, Json(json!({ "status": "ready" }))))
}

/// POST /ingest/run?since=YYYY-MM-DD
///
/// Fetches both feeds, enriches and stores the result. `since` is optional.
pub async fn run_ingestion(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IngestParams>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    tracing::info!("Received request to run ingestion");

    let since = match params.since.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_date(raw).ok_or_else(|| {
            AppError::BadRequest("Invalid 'since' parameter. Use format YYYY-MM-DD.".to_string())
        })?),
        None => None,
    };

    let report = state.pipeline.run_ingestion(since).await?;
    telemetry::record_ingestion(&report);

    tracing::info!(
        run_id = %report.run_id,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Ingestion request served: {} metrics",
        report.metrics_saved
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "Ingestion process completed successfully.",
            "metrics": report.metrics_saved,
        })),
    ))
}

/// GET /metrics/channel?channel=&from=&to=&limit=10&offset=0
pub async fn get_metrics_by_channel(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ChannelQueryParams>,
) -> Result<Json<Vec<EnrichedMetric>>, AppError> {
    let (Some(channel), Some(from), Some(to)) = (
        non_empty(params.channel.as_deref()),
        non_empty(params.from.as_deref()),
        non_empty(params.to.as_deref()),
    ) else {
        return Err(AppError::BadRequest(
            "missing required parameters: channel, from, to".to_string(),
        ));
    };

    let query = range_query(from, to, params.limit.as_deref(), params.offset.as_deref())?;
    let metrics = state.pipeline.repository().by_channel(channel, query)?;

    tracing::debug!("GET /metrics/channel {} -> {} rows", channel, metrics.len());
    Ok(Json(metrics))
}

/// GET /metrics/funnel?utm_campaign=&from=&to=&limit=10&offset=0
pub async fn get_metrics_by_funnel(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FunnelQueryParams>,
) -> Result<Json<Vec<EnrichedMetric>>, AppError> {
    let (Some(utm_campaign), Some(from), Some(to)) = (
        non_empty(params.utm_campaign.as_deref()),
        non_empty(params.from.as_deref()),
        non_empty(params.to.as_deref()),
    ) else {
        return Err(AppError::BadRequest(
            "missing required parameters: utm_campaign, from, to".to_string(),
        ));
    };

    let query = range_query(from, to, params.limit.as_deref(), params.offset.as_deref())?;
    let metrics = state.pipeline.repository().by_funnel(utm_campaign, query)?;

    tracing::debug!("GET /metrics/funnel {} -> {} rows", utm_campaign, metrics.len());
    Ok(Json(metrics))
}

/// POST /export/run?date=YYYY-MM-DD
///
/// Returns 204 when nothing is stored for the date.
pub async fn run_export(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExportParams>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    tracing::info!("Received request to run export");

    let raw = non_empty(params.date.as_deref())
        .ok_or_else(|| AppError::BadRequest("missing required parameter: date".to_string()))?;
    let date = parse_date(raw).ok_or_else(|| {
        AppError::BadRequest("invalid 'date' format, use YYYY-MM-DD".to_string())
    })?;

    if state.config.sink_url.is_none() {
        tracing::debug!("Export for {} runs without a sink; nothing will be sent", date);
    }

    match state.pipeline.export_for_date(date).await? {
        ExportOutcome::NoMetrics => Ok((
            StatusCode::NO_CONTENT,
            Json(json!({ "status": "No metrics found for the specified date." })),
        )),
        ExportOutcome::Exported { count, elapsed } => {
            telemetry::record_export(count, elapsed);
            tracing::info!(
                elapsed_ms = elapsed.as_millis() as u64,
                "Export process completed successfully. Exported {} metrics.",
                count
            );
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({
                    "status": "Export process completed successfully.",
                    "exported": count,
                })),
            ))
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Validate the shared date-range and pagination parameters.
fn range_query(
    from: &str,
    to: &str,
    limit: Option<&str>,
    offset: Option<&str>,
) -> Result<RangeQuery, AppError> {
    let from = parse_query_date(from, "from")?;
    let to = parse_query_date(to, "to")?;

    let limit = limit
        .unwrap_or(DEFAULT_LIMIT)
        .parse::<i64>()
        .ok()
        .filter(|l| *l > 0)
        .and_then(|l| usize::try_from(l).ok())
        .ok_or_else(|| AppError::BadRequest("invalid 'limit' parameter".to_string()))?;
    let offset = offset
        .unwrap_or(DEFAULT_OFFSET)
        .parse::<i64>()
        .ok()
        .and_then(|o| usize::try_from(o).ok())
        .ok_or_else(|| AppError::BadRequest("invalid 'offset' parameter".to_string()))?;

    Ok(RangeQuery {
        from,
        to,
        limit,
        offset,
    })
}

fn parse_query_date(raw: &str, name: &str) -> Result<NaiveDate, AppError> {
    parse_date(raw).ok_or_else(|| {
        AppError::BadRequest(format!("invalid '{}' date format, use YYYY-MM-DD", name))
    })
}
