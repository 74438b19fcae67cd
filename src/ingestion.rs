//! Concurrent ingestion of the ads and CRM feeds.

use crate::errors::AppError;
use crate::feed_client::FeedClient;
use crate::models::{
    parse_date, AdPerformanceRecord, AdsFeedResponse, CrmFeedResponse, Opportunity,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

/// Fetches both upstream feeds for one ingestion pass.
#[derive(Clone)]
pub struct Ingestor {
    ads_url: String,
    crm_url: String,
    client: FeedClient,
}

impl Ingestor {
    pub fn new(ads_url: String, crm_url: String, client: FeedClient) -> Self {
        Self {
            ads_url,
            crm_url,
            client,
        }
    }

    /// Fetch ads and CRM data concurrently.
    ///
    /// Both fetches always run to completion; if either failed the pass fails
    /// as a whole (the ads error wins when both did) and no partial data is
    /// returned. With `since`, both sets are trimmed to records on or after it.
    pub async fn fetch_data(
        &self,
        since: Option<NaiveDate>,
    ) -> Result<(Vec<AdPerformanceRecord>, Vec<Opportunity>), AppError> {
        let ads_fut = self.client.fetch::<AdsFeedResponse>(&self.ads_url);
        let crm_fut = self.client.fetch::<CrmFeedResponse>(&self.crm_url);

        let (ads_result, crm_result) = tokio::join!(ads_fut, crm_fut);

        let ads = ads_result.map_err(|e| AppError::IngestionFailure {
            feed: "ads",
            source: Box::new(e),
        })?;
        let crm = crm_result.map_err(|e| AppError::IngestionFailure {
            feed: "crm",
            source: Box::new(e),
        })?;

        let mut ads = ads.into_records();
        let mut crm = crm.into_records();

        if let Some(cutoff) = since {
            let (ads_total, crm_total) = (ads.len(), crm.len());
            ads = filter_ads_by_date(ads, cutoff);
            crm = filter_crm_by_date(crm, cutoff);
            tracing::debug!(
                "Applied since={} cutoff: ads {} -> {}, crm {} -> {}",
                cutoff,
                ads_total,
                ads.len(),
                crm_total,
                crm.len()
            );
        }

        Ok((ads, crm))
    }
}

/// Keep ad records dated on or after `since`. Records whose date does not parse are dropped.
pub fn filter_ads_by_date(
    ads: Vec<AdPerformanceRecord>,
    since: NaiveDate,
) -> Vec<AdPerformanceRecord> {
    ads.into_iter()
        .filter(|ad| parse_date(&ad.date).is_some_and(|date| date >= since))
        .collect()
}

/// Keep opportunities created on or after midnight UTC of `since`.
pub fn filter_crm_by_date(crm: Vec<Opportunity>, since: NaiveDate) -> Vec<Opportunity> {
    let cutoff =
        DateTime::<Utc>::from_naive_utc_and_offset(since.and_time(NaiveTime::default()), Utc);
    crm.into_iter().filter(|opp| opp.created_at >= cutoff).collect()
}
