/// Join of ad performance with CRM opportunities.
///
/// 1. Group opportunities by normalized attribution key (campaign|source|medium)
/// 2. Look up each ad record's key
/// 3. Count leads / won deals and sum won revenue
/// 4. Derive CPC, CPA, funnel conversion rates and ROAS
use crate::errors::AppError;
use crate::models::{parse_date, AdPerformanceRecord, EnrichedMetric, Opportunity};
use std::collections::HashMap;

/// Placeholder for a blank UTM component.
pub const UNKNOWN_UTM: &str = "unknown";

/// Normalized attribution key for a UTM triple.
///
/// Each part is trimmed and lower-cased; blank parts become `"unknown"`.
pub fn attribution_key(campaign: &str, source: &str, medium: &str) -> String {
    format!(
        "{}|{}|{}",
        normalize_utm(campaign),
        normalize_utm(source),
        normalize_utm(medium)
    )
}

fn normalize_utm(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        UNKNOWN_UTM.to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// `numerator / denominator`, or 0 when the denominator is 0.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Combine ad records with CRM opportunities and compute derived metrics.
///
/// Fails only when `ads` is empty. Ad records with an unparsable date are
/// skipped with a warning; the rest are emitted in input order.
pub fn combine_and_calculate_metrics(
    ads: &[AdPerformanceRecord],
    opportunities: &[Opportunity],
) -> Result<Vec<EnrichedMetric>, AppError> {
    if ads.is_empty() {
        return Err(AppError::EnrichmentPrecondition(
            "ads data is empty".to_string(),
        ));
    }

    let mut by_key: HashMap<String, Vec<&Opportunity>> = HashMap::new();
    for opp in opportunities {
        by_key
            .entry(attribution_key(&opp.utm_campaign, &opp.utm_source, &opp.utm_medium))
            .or_default()
            .push(opp);
    }

    let mut results = Vec::with_capacity(ads.len());
    for ad in ads {
        let key = attribution_key(&ad.utm_campaign, &ad.utm_source, &ad.utm_medium);
        let matches = by_key.get(&key).map(Vec::as_slice).unwrap_or_default();

        let Some(date) = parse_date(&ad.date) else {
            tracing::warn!(
                "Could not parse date '{}' for campaign {}. Skipping record.",
                ad.date,
                ad.campaign_id
            );
            continue;
        };

        results.push(build_metric(ad, date, matches));
    }

    tracing::debug!(
        "Enriched {} of {} ad records against {} opportunities",
        results.len(),
        ads.len(),
        opportunities.len()
    );

    Ok(results)
}

fn build_metric(
    ad: &AdPerformanceRecord,
    date: chrono::NaiveDate,
    matches: &[&Opportunity],
) -> EnrichedMetric {
    let leads = matches.len() as u64;
    // One opportunity counts as one lead.
    let opportunities = leads;

    let (closed_won, revenue) = matches
        .iter()
        .filter(|opp| opp.is_closed_won())
        .fold((0u64, 0.0f64), |(count, sum), opp| (count + 1, sum + opp.amount));

    EnrichedMetric {
        date,
        channel: ad.channel.clone(),
        campaign_id: ad.campaign_id.clone(),
        utm_campaign: ad.utm_campaign.clone(),
        utm_source: ad.utm_source.clone(),
        utm_medium: ad.utm_medium.clone(),
        clicks: ad.clicks,
        impressions: ad.impressions,
        cost: ad.cost,
        leads,
        opportunities,
        closed_won,
        revenue,
        cpc: safe_ratio(ad.cost, ad.clicks as f64),
        cpa: safe_ratio(ad.cost, leads as f64),
        cvr_lead_to_opp: safe_ratio(opportunities as f64, leads as f64),
        cvr_opp_to_won: safe_ratio(closed_won as f64, opportunities as f64),
        roas: safe_ratio(revenue, ad.cost),
    }
}
