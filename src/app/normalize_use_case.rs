use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::app::ports::{DatasetStore, MetricsSink, RawStore};
use crate::app::save_stage_metrics;
use crate::constants::SILVER_LAYER;
use crate::domain::RawDataset;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::normalize::clean;
use crate::pipeline::processing::schema::{SchemaDescriptor, SchemaPolicy};
use crate::pipeline::results::SilverResult;
use crate::timing::StageTimer;

/// Use case for cleaning one raw partition into the Silver snapshot
pub struct NormalizeUseCase {
    raw_store: Arc<dyn RawStore>,
    dataset_store: Arc<dyn DatasetStore>,
    metrics_sink: Arc<dyn MetricsSink>,
    expected_schema: SchemaDescriptor,
    policy: SchemaPolicy,
}

impl NormalizeUseCase {
    pub fn new(
        raw_store: Arc<dyn RawStore>,
        dataset_store: Arc<dyn DatasetStore>,
        metrics_sink: Arc<dyn MetricsSink>,
        expected_schema: SchemaDescriptor,
        policy: SchemaPolicy,
    ) -> Self {
        Self {
            raw_store,
            dataset_store,
            metrics_sink,
            expected_schema,
            policy,
        }
    }

    /// Create a use case expecting the default OpenBreweryDB columns
    pub fn with_default_schema(
        raw_store: Arc<dyn RawStore>,
        dataset_store: Arc<dyn DatasetStore>,
        metrics_sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self::new(
            raw_store,
            dataset_store,
            metrics_sink,
            SchemaDescriptor::default_expected(),
            SchemaPolicy::default(),
        )
    }

    #[instrument(skip(self))]
    pub async fn transform(&self, transform_date: &str, run_id: &str) -> SilverResult {
        let timer = StageTimer::start();
        match self.clean_and_publish(transform_date, run_id, &timer).await {
            Ok(result) => {
                metrics::silver::batch_cleaned(result.records_received, result.records, result.schema_changed);
                metrics::silver::duration(timer.elapsed().as_secs_f64());
                save_stage_metrics(
                    self.metrics_sink.as_ref(),
                    run_id,
                    transform_date,
                    SILVER_LAYER,
                    &result,
                )
                .await;
                result
            }
            Err(e) => {
                error!("Silver transformation failed: {}", e);
                metrics::stage_failed("Silver");
                let mut result = SilverResult::failed(transform_date, timer.elapsed_formatted(), &e);
                if let PipelineError::SchemaRegression { missing, extra } = e {
                    result.schema_changed = true;
                    result.schema_missing_cols = missing;
                    result.schema_extra_cols = extra;
                }
                result.run_id = Some(run_id.to_string());
                result
            }
        }
    }

    async fn clean_and_publish(
        &self,
        transform_date: &str,
        run_id: &str,
        timer: &StageTimer,
    ) -> Result<SilverResult> {
        let pages = self.raw_store.read_raw_pages(transform_date).await?;
        let raw = RawDataset::from_pages(pages);
        info!(records = raw.len(), columns = raw.columns().len(), "Raw records loaded");

        let outcome = clean(&raw, &self.expected_schema, self.policy)?;
        let metrics = outcome.metrics.rounded();
        info!(
            null_name = metrics.null_name,
            null_brewery_type = metrics.null_brewery_type,
            null_city_state = metrics.null_city_state,
            duplicate_id = metrics.duplicate_id,
            invalid_brewery_type = metrics.invalid_brewery_type,
            "Quality indicators"
        );

        let table = outcome.dataset.to_table();
        let output_file = self.dataset_store.write_silver(transform_date, &table).await?;
        info!(records = outcome.dataset.len(), output_file = %output_file, "Silver snapshot written");

        Ok(SilverResult {
            success: true,
            records: outcome.dataset.len(),
            records_received: outcome.records_received,
            output_file: Some(output_file),
            transform_duration: timer.elapsed_formatted(),
            transform_date: transform_date.to_string(),
            run_id: Some(run_id.to_string()),
            ..Default::default()
        }
        .with_drift(&outcome.schema)
        .with_metrics(&outcome.metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawPage;
    use crate::infra::in_memory::InMemoryMetricsSink;
    use crate::pipeline::storage::InMemoryDatalake;
    use serde_json::json;

    fn page(records: serde_json::Value) -> RawPage {
        RawPage {
            file_name: "page_001.json".into(),
            records: records
                .as_array()
                .unwrap()
                .iter()
                .map(|r| r.as_object().cloned().unwrap())
                .collect(),
        }
    }

    fn use_case(lake: &Arc<InMemoryDatalake>, sink: &InMemoryMetricsSink, expected: &[&str]) -> NormalizeUseCase {
        NormalizeUseCase::new(
            lake.clone(),
            lake.clone(),
            Arc::new(sink.clone()),
            SchemaDescriptor::new(expected.iter().copied()),
            SchemaPolicy::default(),
        )
    }

    #[tokio::test]
    async fn cleans_and_writes_the_snapshot() {
        let lake = Arc::new(InMemoryDatalake::new());
        lake.replace_raw_pages(
            "2026-02-14",
            &[page(json!([
                {"id": "1", "name": "A", "brewery_type": "micro", "city": "X", "state": "Y"},
                {"id": "1", "name": "A dup", "brewery_type": "micro", "city": "X", "state": "Y"},
                {"id": "2", "name": "B", "brewery_type": "nano", "city": "Z", "state": "W"}
            ]))],
        )
        .await
        .unwrap();
        let sink = InMemoryMetricsSink::new();

        let result = use_case(&lake, &sink, &["id", "name", "brewery_type", "city", "state"])
            .transform("2026-02-14", "run")
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.records, 2);
        assert_eq!(result.records_received, 3);
        assert_eq!(result.duplicate_id, 33.33);
        assert!(!result.schema_changed);
        assert_eq!(lake.read_silver("2026-02-14").await.unwrap().rows.len(), 2);
        assert_eq!(sink.for_layer("silver").len(), 10);
    }

    #[tokio::test]
    async fn missing_columns_fail_with_the_drift_recorded() {
        let lake = Arc::new(InMemoryDatalake::new());
        lake.replace_raw_pages("2026-02-14", &[page(json!([{"id": "1", "name": "A"}]))])
            .await
            .unwrap();
        let sink = InMemoryMetricsSink::new();

        let result = use_case(&lake, &sink, &["id", "name", "city"])
            .transform("2026-02-14", "run")
            .await;

        assert!(!result.success);
        assert!(result.schema_changed);
        assert_eq!(result.schema_missing_cols, vec!["city"]);
        assert!(lake.read_silver("2026-02-14").await.is_err());
        assert!(sink.entries().is_empty());
    }

    #[tokio::test]
    async fn missing_raw_partition_fails() {
        let lake = Arc::new(InMemoryDatalake::new());
        let sink = InMemoryMetricsSink::new();
        let result = NormalizeUseCase::with_default_schema(lake.clone(), lake, Arc::new(sink))
            .transform("2026-02-14", "run")
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Raw partition not found"));
    }
}
