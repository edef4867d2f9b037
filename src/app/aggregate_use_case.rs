use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::app::ports::{DatasetStore, MetricsSink};
use crate::app::save_stage_metrics;
use crate::constants::{GOLD_BY_STATE_TYPE, GOLD_LAYER};
use crate::domain::CleanedDataset;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::aggregate::aggregate;
use crate::pipeline::results::GoldResult;
use crate::timing::StageTimer;

/// Use case for building the Gold count tables from a Silver snapshot
pub struct AggregateUseCase {
    dataset_store: Arc<dyn DatasetStore>,
    metrics_sink: Arc<dyn MetricsSink>,
}

impl AggregateUseCase {
    pub fn new(dataset_store: Arc<dyn DatasetStore>, metrics_sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            dataset_store,
            metrics_sink,
        }
    }

    #[instrument(skip(self))]
    pub async fn transform(&self, transform_date: &str, run_id: &str) -> GoldResult {
        let timer = StageTimer::start();
        match self.aggregate_and_publish(transform_date, run_id, &timer).await {
            Ok(result) => {
                metrics::gold::duration(timer.elapsed().as_secs_f64());
                save_stage_metrics(
                    self.metrics_sink.as_ref(),
                    run_id,
                    transform_date,
                    GOLD_LAYER,
                    &result,
                )
                .await;
                result
            }
            Err(e) => {
                error!("Gold transformation failed: {}", e);
                metrics::stage_failed("Gold");
                let mut result = GoldResult::failed(transform_date, timer.elapsed_formatted(), e);
                result.run_id = Some(run_id.to_string());
                result
            }
        }
    }

    async fn aggregate_and_publish(
        &self,
        transform_date: &str,
        run_id: &str,
        timer: &StageTimer,
    ) -> Result<GoldResult> {
        let table = self.dataset_store.read_silver(transform_date).await?;
        let dataset = CleanedDataset::from_table(&table)?;
        if dataset.is_empty() {
            return Err(PipelineError::EmptyResult(format!(
                "Silver snapshot for {} has no rows",
                transform_date
            )));
        }
        info!(records = dataset.len(), "Silver records loaded");

        // every table is built before the first write
        let report = aggregate(&dataset)?;

        let tables = report.tables();
        let output_files = self
            .dataset_store
            .write_gold_tables(transform_date, &tables)
            .await?;
        for (name, table) in &tables {
            metrics::gold::table_written(name, table.len());
            info!(table = *name, rows = table.len(), location = ?output_files.get(*name), "Gold table written");
        }

        Ok(GoldResult {
            success: true,
            output_file: output_files.get(GOLD_BY_STATE_TYPE).cloned(),
            output_files,
            records_received: dataset.len(),
            records_gold: report.by_state_type.len(),
            records_state: report.by_state.len(),
            records_type: report.by_type.len(),
            records_city: report.by_city_state.len(),
            duration: timer.elapsed_formatted(),
            run_id: Some(run_id.to_string()),
            transform_date: transform_date.to_string(),
            error: None,
        })
    }
}
