pub mod ports;
pub mod health_check_use_case;
pub mod ingest_use_case;
pub mod normalize_use_case;
pub mod aggregate_use_case;
pub mod quality_gate_use_case;

use tracing::warn;

use crate::app::ports::{MetricEntry, MetricsSink};
use crate::pipeline::results::StageOutcome;

/// Write every metric of a successful stage under its layer.
///
/// Sink failures are logged and swallowed: the datasets are already published.
pub async fn save_stage_metrics(
    sink: &dyn MetricsSink,
    run_id: &str,
    execution_date: &str,
    layer: &str,
    outcome: &dyn StageOutcome,
) {
    for (name, value) in outcome.metrics() {
        let entry = MetricEntry {
            run_id: run_id.to_string(),
            execution_date: execution_date.to_string(),
            layer: layer.to_string(),
            metric_name: name.to_string(),
            metric_value: value,
        };
        if let Err(e) = sink.save_metric(&entry).await {
            warn!(layer, metric = name, error = %e, "Failed to save metric");
        }
    }
}
