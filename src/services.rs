use crate::enrichment::combine_and_calculate_metrics;
use crate::errors::{AppError, ResultExt};
use crate::exporter::Exporter;
use crate::ingestion::Ingestor;
use crate::models::EnrichedMetric;
use crate::repository::MetricRepository;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

/// Outcome of one ingestion pass.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionReport {
    pub run_id: Uuid,
    pub ads_fetched: usize,
    pub opportunities_fetched: usize,
    pub metrics_saved: usize,
    pub elapsed: Duration,
}

/// Outcome of an export-by-date run.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    /// Nothing stored for the requested date; the sink was not called.
    NoMetrics,
    Exported { count: usize, elapsed: Duration },
}

/// Ingest → enrich → store, and snapshot → export.
pub struct PipelineService {
    ingestor: Ingestor,
    repository: Arc<dyn MetricRepository>,
    exporter: Exporter,
}

impl PipelineService {
    pub fn new(
        ingestor: Ingestor,
        repository: Arc<dyn MetricRepository>,
        exporter: Exporter,
    ) -> Self {
        Self {
            ingestor,
            repository,
            exporter,
        }
    }

    pub fn repository(&self) -> &Arc<dyn MetricRepository> {
        &self.repository
    }

    /// Run one ingestion pass.
    ///
    /// All-or-nothing with respect to the feeds: if either fetch fails, or
    /// enrichment has nothing to work with, nothing is written to the store.
    pub async fn run_ingestion(
        &self,
        since: Option<NaiveDate>,
    ) -> Result<IngestionReport, AppError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("ingestion", %run_id);

        async move {
            let started = Instant::now();
            tracing::info!("Starting data ingestion (since: {:?})", since);

            let (ads, crm) = self.ingestor.fetch_data(since).await?;
            tracing::info!(
                "Ingestion successful. Fetched {} ad records and {} crm records.",
                ads.len(),
                crm.len()
            );

            let enriched = combine_and_calculate_metrics(&ads, &crm)?;
            tracing::info!(
                "Transformation successful. Generated {} enriched metrics.",
                enriched.len()
            );

            let metrics_saved = enriched.len();
            for metric in enriched {
                self.repository.save(metric);
            }

            let report = IngestionReport {
                run_id,
                ads_fetched: ads.len(),
                opportunities_fetched: crm.len(),
                metrics_saved,
                elapsed: started.elapsed(),
            };
            tracing::info!(
                "Ingestion process completed. Saved {} metrics in {:?}",
                report.metrics_saved,
                report.elapsed
            );
            Ok::<_, AppError>(report)
        }
        .instrument(span)
        .await
    }

    /// Export every stored metric dated `date` to the sink.
    pub async fn export_for_date(&self, date: NaiveDate) -> Result<ExportOutcome, AppError> {
        let started = Instant::now();

        let metrics: Vec<EnrichedMetric> = self
            .repository
            .all()
            .context("Failed to retrieve metrics from repository")?
            .into_iter()
            .filter(|m| m.date == date)
            .collect();

        if metrics.is_empty() {
            tracing::warn!("No metrics found for the specified date: {}", date);
            return Ok(ExportOutcome::NoMetrics);
        }

        self.exporter
            .export_metrics(&metrics)
            .await
            .with_context(|| format!("export for {}", date))?;

        Ok(ExportOutcome::Exported {
            count: metrics.len(),
            elapsed: started.elapsed(),
        })
    }

    /// Readiness: the store must be readable.
    pub fn check_ready(&self) -> Result<(), AppError> {
        self.repository
            .all()
            .map(|_| ())
            .map_err(|e| AppError::ServiceUnavailable(format!("repository not accessible: {}", e)))
    }
}
