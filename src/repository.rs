use crate::errors::AppError;
use crate::models::{EnrichedMetric, RangeQuery};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Storage seam for enriched metrics.
pub trait MetricRepository: Send + Sync {
    /// Insert or replace the metric stored under its (date, campaign, channel) key.
    fn save(&self, metric: EnrichedMetric);

    /// Metrics for `channel` dated within the range, paginated.
    fn by_channel(
        &self,
        channel: &str,
        query: RangeQuery,
    ) -> Result<Vec<EnrichedMetric>, AppError>;

    /// Metrics whose raw `utm_campaign` equals `utm_campaign` (case-sensitive), paginated.
    fn by_funnel(
        &self,
        utm_campaign: &str,
        query: RangeQuery,
    ) -> Result<Vec<EnrichedMetric>, AppError>;

    /// Unordered snapshot of everything stored.
    fn all(&self) -> Result<Vec<EnrichedMetric>, AppError>;
}

/// Process-local metric store behind a reader/writer lock.
#[derive(Default)]
pub struct InMemoryRepository {
    storage: RwLock<HashMap<String, EnrichedMetric>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.storage
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn scan<F>(&self, query: RangeQuery, keep: F) -> Result<Vec<EnrichedMetric>, AppError>
    where
        F: Fn(&EnrichedMetric) -> bool,
    {
        let filtered: Vec<EnrichedMetric> = {
            let storage = self.storage.read().map_err(poisoned)?;
            storage
                .values()
                .filter(|m| keep(m) && m.in_range(query.from, query.to))
                .cloned()
                .collect()
        };

        Ok(paginate(filtered, query.limit, query.offset))
    }
}

impl MetricRepository for InMemoryRepository {
    fn save(&self, metric: EnrichedMetric) {
        let key = metric.storage_key();
        // A panicked writer cannot leave a half-written entry behind, so the guard is reused.
        let mut storage = self.storage.write().unwrap_or_else(PoisonError::into_inner);
        storage.insert(key, metric);
    }

    fn by_channel(
        &self,
        channel: &str,
        query: RangeQuery,
    ) -> Result<Vec<EnrichedMetric>, AppError> {
        self.scan(query, |m| m.channel == channel)
    }

    fn by_funnel(
        &self,
        utm_campaign: &str,
        query: RangeQuery,
    ) -> Result<Vec<EnrichedMetric>, AppError> {
        self.scan(query, |m| m.utm_campaign == utm_campaign)
    }

    fn all(&self) -> Result<Vec<EnrichedMetric>, AppError> {
        let storage = self.storage.read().map_err(poisoned)?;
        Ok(storage.values().cloned().collect())
    }
}

fn poisoned<T>(_: PoisonError<T>) -> AppError {
    AppError::InternalError("metric store lock poisoned".to_string())
}

/// Window `[offset, offset + limit)` of `items`, clipped to its length.
pub fn paginate<T>(items: Vec<T>, limit: usize, offset: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit).collect()
}
