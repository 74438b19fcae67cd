use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Calendar date format used by the feeds and by query parameters.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Stage value marking an opportunity as won.
pub const STAGE_CLOSED_WON: &str = "closed_won";

/// Parse a `YYYY-MM-DD` string into a calendar date.
///
/// Only the zero-padded ten character form is accepted; `2025-8-1` and
/// surrounding whitespace are rejected.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let bytes = raw.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !well_formed {
        return None;
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}

/// Feed fields sent as JSON `null` decode to their zero value.
mod null_as_default {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
    }
}

// ============ Feed records ============

/// One day of performance for one campaign on one channel, as sent by the ads feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdPerformanceRecord {
    /// Kept as received; parsed during enrichment so bad dates only skip their own record.
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub date: String,
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub campaign_id: String,
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub channel: String,
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub clicks: u64,
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub impressions: u64,
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub cost: f64,
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub utm_campaign: String,
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub utm_source: String,
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub utm_medium: String,
}

/// CRM opportunity record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Opportunity {
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub opportunity_id: String,
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub contact_email: String,
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub stage: String,
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub amount: f64,
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub utm_campaign: String,
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub utm_source: String,
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub utm_medium: String,
}

impl Opportunity {
    pub fn is_closed_won(&self) -> bool {
        self.stage == STAGE_CLOSED_WON
    }
}

// ============ Feed envelopes ============

/// Ads feed body: `{"external": {"ads": {"performance": [...]}}}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdsFeedResponse {
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub external: AdsExternal,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdsExternal {
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub ads: AdsSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdsSection {
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub performance: Vec<AdPerformanceRecord>,
}

impl AdsFeedResponse {
    pub fn into_records(self) -> Vec<AdPerformanceRecord> {
        self.external.ads.performance
    }
}

/// CRM feed body: `{"external": {"crm": {"opportunities": [...]}}}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CrmFeedResponse {
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub external: CrmExternal,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CrmExternal {
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub crm: CrmSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CrmSection {
    #[serde(deserialize_with = "null_as_default::deserialize")]
    pub opportunities: Vec<Opportunity>,
}

impl CrmFeedResponse {
    pub fn into_records(self) -> Vec<Opportunity> {
        self.external.crm.opportunities
    }
}

// ============ Enriched metric ============

/// Ad spend for one (date, campaign, channel) joined with its attributed CRM outcomes.
///
/// Serialized with the PascalCase keys downstream consumers already read
/// (`CampaignID`, `UTMCampaign`, `CPC`, `ROAS`, ...). `leads` and
/// `opportunities` always hold the same count; both keys are part of the
/// wire format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnrichedMetric {
    #[serde(with = "midnight_utc")]
    pub date: NaiveDate,
    pub channel: String,
    #[serde(rename = "CampaignID")]
    pub campaign_id: String,
    #[serde(rename = "UTMCampaign")]
    pub utm_campaign: String,
    #[serde(rename = "UTMSource")]
    pub utm_source: String,
    #[serde(rename = "UTMMedium")]
    pub utm_medium: String,
    pub clicks: u64,
    pub impressions: u64,
    pub cost: f64,
    pub leads: u64,
    pub opportunities: u64,
    pub closed_won: u64,
    pub revenue: f64,
    #[serde(rename = "CPC")]
    pub cpc: f64,
    #[serde(rename = "CPA")]
    pub cpa: f64,
    #[serde(rename = "CVRLeadToOpp")]
    pub cvr_lead_to_opp: f64,
    #[serde(rename = "CVROppToWon")]
    pub cvr_opp_to_won: f64,
    #[serde(rename = "ROAS")]
    pub roas: f64,
}

impl EnrichedMetric {
    /// Store key: `{date}|{campaign_id}|{channel}`.
    pub fn storage_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.date.format(DATE_FORMAT),
            self.campaign_id,
            self.channel
        )
    }

    pub fn in_range(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.date >= from && self.date <= to
    }
}

/// Dates travel as UTC midnight timestamps (`2025-08-01T00:00:00Z`).
/// Bare `YYYY-MM-DD` is accepted when reading.
mod midnight_utc {
    use super::DATE_FORMAT;
    use chrono::{DateTime, NaiveDate};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&format_args!("{}T00:00:00Z", date.format(DATE_FORMAT)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.date_naive())
            .or_else(|_| NaiveDate::parse_from_str(&raw, DATE_FORMAT))
            .map_err(|e| serde::de::Error::custom(format!("invalid date '{}': {}", raw, e)))
    }
}

// ============ Query parameters ============

/// Query string for `POST /ingest/run`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestParams {
    pub since: Option<String>,
}

/// Query string for `GET /metrics/channel`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelQueryParams {
    pub channel: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

/// Query string for `GET /metrics/funnel`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunnelQueryParams {
    pub utm_campaign: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

/// Query string for `POST /export/run`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportParams {
    pub date: Option<String>,
}

/// Validated date range plus pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub limit: usize,
    pub offset: usize,
}
