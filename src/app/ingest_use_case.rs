use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::app::ports::{MetricsSink, PageSource, RawStore};
use crate::app::save_stage_metrics;
use crate::constants::BRONZE_LAYER;
use crate::domain::RawPage;
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::results::BronzeResult;
use crate::timing::{round2, StageTimer};

/// File name of a landed page, e.g. `page_007.json`.
pub fn page_file_name(page: u32) -> String {
    format!("page_{:03}.json", page)
}

/// Paging limits of one ingestion
#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    pub per_page: u32,
    pub max_pages: u32,
}

/// Use case for landing the raw API pages of one date (Bronze)
pub struct IngestUseCase {
    source: Arc<dyn PageSource>,
    raw_store: Arc<dyn RawStore>,
    metrics_sink: Arc<dyn MetricsSink>,
    settings: IngestSettings,
}

impl IngestUseCase {
    pub fn new(
        source: Arc<dyn PageSource>,
        raw_store: Arc<dyn RawStore>,
        metrics_sink: Arc<dyn MetricsSink>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            source,
            raw_store,
            metrics_sink,
            settings,
        }
    }

    /// Fetch every page and publish them as one partition. Errors end up in the result.
    #[instrument(skip(self))]
    pub async fn ingest(&self, ingestion_date: &str, run_id: &str) -> BronzeResult {
        let timer = StageTimer::start();
        match self.fetch_and_publish(ingestion_date, run_id, &timer).await {
            Ok(result) => {
                metrics::bronze::duration(timer.elapsed().as_secs_f64());
                save_stage_metrics(
                    self.metrics_sink.as_ref(),
                    run_id,
                    ingestion_date,
                    BRONZE_LAYER,
                    &result,
                )
                .await;
                result
            }
            Err(e) => {
                error!("Bronze ingestion failed: {}", e);
                metrics::stage_failed("Bronze");
                BronzeResult::failed(ingestion_date, timer.elapsed_formatted(), e)
            }
        }
    }

    async fn fetch_and_publish(
        &self,
        ingestion_date: &str,
        run_id: &str,
        timer: &StageTimer,
    ) -> Result<BronzeResult> {
        let mut pages = Vec::new();
        let mut latencies: Vec<Duration> = Vec::new();
        let mut total_records = 0;

        for page in 1..=self.settings.max_pages {
            let fetched = match self.source.fetch_page(page, self.settings.per_page).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    metrics::bronze::fetch_error();
                    return Err(e);
                }
            };
            latencies.push(fetched.latency);

            if fetched.records.is_empty() {
                info!(page, "Empty page, ingestion complete");
                break;
            }

            metrics::bronze::page_fetched(fetched.records.len(), fetched.latency.as_secs_f64());
            total_records += fetched.records.len();
            info!(page, records = fetched.records.len(), "Page fetched");
            pages.push(RawPage {
                file_name: page_file_name(page),
                records: fetched.records,
            });

            if page == self.settings.max_pages {
                warn!(max_pages = self.settings.max_pages, "Reached the page limit, stopping");
            }
        }

        if total_records == 0 {
            warn!("The API returned no records");
        }

        let stored = self.raw_store.replace_raw_pages(ingestion_date, &pages).await?;
        let api_latency_ms = average_millis(&latencies);
        info!(
            total_records,
            pages = pages.len(),
            api_latency_ms,
            location = %stored.location,
            "Bronze ingestion finished"
        );

        Ok(BronzeResult {
            success: true,
            total_records,
            pages_processed: pages.len(),
            output_folder: Some(stored.location),
            ingestion_duration: timer.elapsed_formatted(),
            ingestion_date: ingestion_date.to_string(),
            api_latency_ms,
            run_id: Some(run_id.to_string()),
            page_checksums: stored.checksums,
            error: None,
        })
    }
}

fn average_millis(latencies: &[Duration]) -> f64 {
    if latencies.is_empty() {
        return 0.0;
    }
    let total: f64 = latencies.iter().map(|l| l.as_secs_f64() * 1000.0).sum();
    round2(total / latencies.len() as f64)
}
