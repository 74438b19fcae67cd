use crate::errors::AppError;
use crate::models::EnrichedMetric;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the request body.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Pushes enriched metrics to the downstream sink.
#[derive(Clone)]
pub struct Exporter {
    client: reqwest::Client,
    sink_url: Option<String>,
    sink_secret: String,
}

impl Exporter {
    /// Creates a new `Exporter`.
    ///
    /// # Arguments
    ///
    /// * `sink_url` - Sink endpoint; `None` disables export.
    /// * `sink_secret` - Shared secret used to sign each batch.
    pub fn new(sink_url: Option<String>, sink_secret: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create sink client: {}", e)))?;

        Ok(Self {
            client,
            sink_url,
            sink_secret,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.sink_url.is_some()
    }

    /// Serialize, sign and POST `metrics` to the sink.
    ///
    /// Succeeds without sending anything when no sink is configured. Any
    /// transport error or non-200 response is an `ExportFailure`; there is no retry.
    pub async fn export_metrics(&self, metrics: &[EnrichedMetric]) -> Result<(), AppError> {
        let Some(ref sink_url) = self.sink_url else {
            tracing::warn!("SINK_URL not configured. Skipping export.");
            return Ok(());
        };

        let payload = serde_json::to_vec(metrics)
            .map_err(|e| AppError::ExportFailure(format!("failed to marshal metrics: {}", e)))?;
        let signature = sign_payload(&self.sink_secret, &payload)?;

        let response = self
            .client
            .post(sink_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                AppError::ExportFailure(format!("failed to send request to sink: {}", e))
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExportFailure(format!(
                "sink returned non-200 status code {}: {}",
                status, error_text
            )));
        }

        tracing::info!("✓ Exported {} metrics to sink", metrics.len());
        Ok(())
    }
}

/// Hex-encoded HMAC-SHA256 of `payload` keyed by `secret`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::ExportFailure(format!("HMAC error: {}", e)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
