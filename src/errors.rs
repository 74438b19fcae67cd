use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// A feed request kept failing until the retry budget ran out.
    FetchError {
        /// Endpoint that was being fetched.
        url: String,
        /// Number of attempts actually made.
        attempts: u32,
        /// Cause reported by the last attempt.
        cause: String,
    },
    /// One of the two feeds failed, so the whole ingestion pass is discarded.
    IngestionFailure {
        /// Which feed failed ("ads" or "crm").
        feed: &'static str,
        /// The underlying fetch error.
        source: Box<AppError>,
    },
    /// Enrichment was asked to run with nothing to enrich.
    EnrichmentPrecondition(String),
    /// Serialization, signing, transport or non-200 response while exporting.
    ExportFailure(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// The service cannot serve requests right now.
    ServiceUnavailable(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Returns the innermost error, skipping any context wrappers.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::FetchError {
                url,
                attempts,
                cause,
            } => write!(
                f,
                "request to {} failed after {} attempt(s): {}",
                url, attempts, cause
            ),
            AppError::IngestionFailure { feed, source } => {
                write!(f, "failed to fetch {} data: {}", feed, source)
            }
            AppError::EnrichmentPrecondition(msg) => write!(f, "Enrichment error: {}", msg),
            AppError::ExportFailure(msg) => write!(f, "Export error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and JSON body.
    /// Logs errors appropriately based on their severity.
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::FetchError { .. } | AppError::IngestionFailure { .. } => {
                tracing::error!("Data ingestion failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Failed to ingest data" }),
                )
            }
            AppError::EnrichmentPrecondition(ref msg) => {
                tracing::error!("Data transformation failed: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Failed to transform data" }),
                )
            }
            AppError::ExportFailure(ref msg) => {
                tracing::error!("Export failed: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Failed to export data" }),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::ServiceUnavailable(msg) => {
                tracing::error!("Readiness check failed: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "status": "unavailable", "error": msg }),
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
            AppError::WithContext { source, context } => {
                // Log full context chain, respond as the underlying error
                tracing::error!("Error with context: {} -> {}", context, source);
                return source.into_response();
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Arguments
    ///
    /// * `f` - A closure that produces the context message.
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingestion_failure_display_names_feed() {
        let err = AppError::IngestionFailure {
            feed: "crm",
            source: Box::new(AppError::FetchError {
                url: "http://crm.local/feed".to_string(),
                attempts: 3,
                cause: "status 503 Service Unavailable".to_string(),
            }),
        };

        let msg = err.to_string();
        assert!(msg.starts_with("failed to fetch crm data"));
        assert!(msg.contains("after 3 attempt(s)"));
    }

    #[test]
    fn test_root_skips_context() {
        let err: Result<(), AppError> =
            Err(AppError::ExportFailure("sink returned 500".to_string()));
        let err = err.context("export run").context("handler").unwrap_err();

        assert!(matches!(err.root(), AppError::ExportFailure(_)));
    }

    #[test]
    fn test_status_codes() {
        let resp = AppError::BadRequest("missing".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = AppError::ServiceUnavailable("lock".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let wrapped = AppError::WithContext {
            source: Box::new(AppError::BadRequest("x".to_string())),
            context: "query".to_string(),
        };
        assert_eq!(wrapped.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
