use crate::feed_client::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub ads_api_url: String,
    pub crm_api_url: String,
    pub sink_url: Option<String>,
    pub sink_secret: String,
    pub feed_max_attempts: u32,
    pub feed_base_delay_ms: u64,
    pub feed_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let sink_url = std::env::var("SINK_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|url| validate_http_url("SINK_URL", url))
            .transpose()?;

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            ads_api_url: std::env::var("ADS_API_URL")
                .map_err(|_| anyhow::anyhow!("ADS_API_URL environment variable required"))
                .and_then(|url| validate_http_url("ADS_API_URL", url))?,
            crm_api_url: std::env::var("CRM_API_URL")
                .map_err(|_| anyhow::anyhow!("CRM_API_URL environment variable required"))
                .and_then(|url| validate_http_url("CRM_API_URL", url))?,
            sink_secret: match (&sink_url, std::env::var("SINK_SECRET")) {
                (_, Ok(secret)) if !secret.trim().is_empty() => secret,
                (Some(_), _) => {
                    anyhow::bail!("SINK_SECRET is required when SINK_URL is set")
                }
                (None, _) => String::new(),
            },
            sink_url,
            feed_max_attempts: parse_or_default("FEED_MAX_ATTEMPTS", 3u32).and_then(|n| {
                if n == 0 {
                    anyhow::bail!("FEED_MAX_ATTEMPTS must be at least 1");
                }
                Ok(n)
            })?,
            feed_base_delay_ms: parse_or_default("FEED_BASE_DELAY_MS", 500u64)?,
            feed_timeout_secs: parse_or_default("FEED_TIMEOUT_SECS", 10u64)?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Ads API URL: {}", config.ads_api_url);
        tracing::debug!("CRM API URL: {}", config.crm_api_url);
        match config.sink_url {
            Some(ref sink) => tracing::info!("Sink URL configured: {}", sink),
            None => tracing::warn!("SINK_URL not set, export runs will be skipped"),
        }
        tracing::debug!(
            "Feed retry policy: {} attempts, {}ms base delay, {}s timeout",
            config.feed_max_attempts,
            config.feed_base_delay_ms,
            config.feed_timeout_secs
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.feed_max_attempts,
            base_delay: Duration::from_millis(self.feed_base_delay_ms),
            timeout: Duration::from_secs(self.feed_timeout_secs),
        }
    }
}

fn validate_http_url(name: &str, url: String) -> anyhow::Result<String> {
    if url.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    url::Url::parse(&url).map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    Ok(url)
}

fn parse_or_default<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a non-negative integer", name)),
        _ => Ok(default),
    }
}
