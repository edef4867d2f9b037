//! Process metrics for the brewery pipeline
//!
//! Stages record through the per-phase helpers below; the Prometheus recorder
//! keeps them in memory and [`push_all_metrics`] ships the rendered snapshot to
//! a Pushgateway at the end of a run.

use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// Enum representing all metric names used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Health check
    HealthChecksTotal,
    HealthChecksFailed,

    // Bronze
    BronzePagesFetched,
    BronzeRecordsIngested,
    BronzeFetchErrors,
    BronzePageLatency,
    BronzeDuration,

    // Silver
    SilverRecordsReceived,
    SilverRecordsWritten,
    SilverSchemaDrift,
    SilverDuration,

    // Gold
    GoldTablesWritten,
    GoldRowsWritten,
    GoldDuration,

    // Quality gate
    QualityGatePassed,
    QualityGateFailed,
    QualityViolations,
    QualityWarnings,

    // Any stage
    StageFailures,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::HealthChecksTotal => "brewery_health_checks_total",
            MetricName::HealthChecksFailed => "brewery_health_checks_failed_total",

            MetricName::BronzePagesFetched => "brewery_bronze_pages_fetched_total",
            MetricName::BronzeRecordsIngested => "brewery_bronze_records_ingested_total",
            MetricName::BronzeFetchErrors => "brewery_bronze_fetch_errors_total",
            MetricName::BronzePageLatency => "brewery_bronze_page_latency_seconds",
            MetricName::BronzeDuration => "brewery_bronze_duration_seconds",

            MetricName::SilverRecordsReceived => "brewery_silver_records_received_total",
            MetricName::SilverRecordsWritten => "brewery_silver_records_written_total",
            MetricName::SilverSchemaDrift => "brewery_silver_schema_drift_total",
            MetricName::SilverDuration => "brewery_silver_duration_seconds",

            MetricName::GoldTablesWritten => "brewery_gold_tables_written_total",
            MetricName::GoldRowsWritten => "brewery_gold_rows_written_total",
            MetricName::GoldDuration => "brewery_gold_duration_seconds",

            MetricName::QualityGatePassed => "brewery_quality_gate_passed_total",
            MetricName::QualityGateFailed => "brewery_quality_gate_failed_total",
            MetricName::QualityViolations => "brewery_quality_violations_total",
            MetricName::QualityWarnings => "brewery_quality_warnings_total",

            MetricName::StageFailures => "brewery_stage_failures_total",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            HealthChecksTotal,
            HealthChecksFailed,
            BronzePagesFetched,
            BronzeRecordsIngested,
            BronzeFetchErrors,
            BronzePageLatency,
            BronzeDuration,
            SilverRecordsReceived,
            SilverRecordsWritten,
            SilverSchemaDrift,
            SilverDuration,
            GoldTablesWritten,
            GoldRowsWritten,
            GoldDuration,
            QualityGatePassed,
            QualityGateFailed,
            QualityViolations,
            QualityWarnings,
            StageFailures,
        ]
        .into_iter()
    }

    /// Returns (phase, description, unit)
    pub fn metadata(&self) -> (&'static str, &'static str, Option<&'static str>) {
        match self {
            MetricName::HealthChecksTotal => ("health", "API availability probes sent", None),
            MetricName::HealthChecksFailed => ("health", "API availability probes that failed", None),

            MetricName::BronzePagesFetched => ("bronze", "Pages fetched from the API", None),
            MetricName::BronzeRecordsIngested => ("bronze", "Raw records landed", None),
            MetricName::BronzeFetchErrors => ("bronze", "Page fetches that failed after retries", None),
            MetricName::BronzePageLatency => ("bronze", "Latency of one page request", Some("s")),
            MetricName::BronzeDuration => ("bronze", "Bronze stage duration", Some("s")),

            MetricName::SilverRecordsReceived => ("silver", "Raw records read by Silver", None),
            MetricName::SilverRecordsWritten => ("silver", "Cleaned records written", None),
            MetricName::SilverSchemaDrift => ("silver", "Runs whose columns drifted", None),
            MetricName::SilverDuration => ("silver", "Silver stage duration", Some("s")),

            MetricName::GoldTablesWritten => ("gold", "Aggregate tables written", None),
            MetricName::GoldRowsWritten => ("gold", "Aggregate rows written", None),
            MetricName::GoldDuration => ("gold", "Gold stage duration", Some("s")),

            MetricName::QualityGatePassed => ("quality", "Runs that passed the gate", None),
            MetricName::QualityGateFailed => ("quality", "Runs rejected by the gate", None),
            MetricName::QualityViolations => ("quality", "Threshold violations found", None),
            MetricName::QualityWarnings => ("quality", "Non-fatal gate warnings", None),

            MetricName::StageFailures => ("pipeline", "Stage failures by stage", None),
        }
    }
}

struct MetricsState {
    handle: metrics_exporter_prometheus::PrometheusHandle,
    pushgateway_url: Option<String>,
    job: String,
    instance: String,
}

static METRICS_STATE: OnceLock<Arc<MetricsState>> = OnceLock::new();

/// Initialize the metrics system without a push gateway
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    init_with_push_options(None, None, None)
}

/// Install the Prometheus recorder, remembering where to push the snapshot
pub fn init_with_push_options(
    pushgateway_url: Option<&str>,
    job_name: Option<&str>,
    instance: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;

    METRICS_STATE
        .set(Arc::new(MetricsState {
            handle,
            pushgateway_url: pushgateway_url.map(str::to_string),
            job: job_name.unwrap_or("brewery_pipeline").to_string(),
            instance: instance.unwrap_or("default").to_string(),
        }))
        .ok();

    if pushgateway_url.is_some() {
        info!("Metrics system initialized with push gateway support");
    } else {
        info!("Metrics system initialized (no push gateway)");
    }
    Ok(())
}

/// Current snapshot in Prometheus text format
pub fn render() -> Option<String> {
    METRICS_STATE.get().map(|state| state.handle.render())
}

/// Push ALL collected metrics to the configured Pushgateway, if any
pub async fn push_all_metrics() -> Result<(), Box<dyn std::error::Error>> {
    let Some(state) = METRICS_STATE.get() else {
        warn!("Metrics not initialized; nothing to push");
        return Ok(());
    };
    let Some(base) = state.pushgateway_url.as_deref() else {
        return Ok(());
    };

    let push_url = format!(
        "{}/metrics/job/{}/instance/{}",
        base.trim_end_matches('/'),
        state.job,
        state.instance
    );

    let mut metrics_text = format!(
        "# HELP brewery_push_timestamp_ms Last push timestamp\n\
         # TYPE brewery_push_timestamp_ms gauge\n\
         brewery_push_timestamp_ms {}\n",
        chrono::Utc::now().timestamp_millis()
    );
    metrics_text.push_str(&state.handle.render());

    let response = reqwest::Client::new()
        .post(&push_url)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(metrics_text)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("Pushgateway returned status {}: {}", status, body).into());
    }

    info!("Pushed metrics to Pushgateway job={} instance={}", state.job, state.instance);
    Ok(())
}

// ============================================================================
// Health Check Metrics
// ============================================================================

pub mod health {
    use super::MetricName;

    pub fn probe(available: bool) {
        ::metrics::counter!(MetricName::HealthChecksTotal.as_str()).increment(1);
        if !available {
            ::metrics::counter!(MetricName::HealthChecksFailed.as_str()).increment(1);
        }
    }
}

// ============================================================================
// Bronze Metrics
// ============================================================================

pub mod bronze {
    use super::MetricName;

    /// Record one fetched page and its latency
    pub fn page_fetched(records: usize, latency_secs: f64) {
        ::metrics::counter!(MetricName::BronzePagesFetched.as_str()).increment(1);
        ::metrics::counter!(MetricName::BronzeRecordsIngested.as_str()).increment(records as u64);
        ::metrics::histogram!(MetricName::BronzePageLatency.as_str()).record(latency_secs);
    }

    pub fn fetch_error() {
        ::metrics::counter!(MetricName::BronzeFetchErrors.as_str()).increment(1);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::BronzeDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Silver Metrics
// ============================================================================

pub mod silver {
    use super::MetricName;

    pub fn batch_cleaned(received: usize, written: usize, schema_changed: bool) {
        ::metrics::counter!(MetricName::SilverRecordsReceived.as_str()).increment(received as u64);
        ::metrics::counter!(MetricName::SilverRecordsWritten.as_str()).increment(written as u64);
        if schema_changed {
            ::metrics::counter!(MetricName::SilverSchemaDrift.as_str()).increment(1);
        }
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::SilverDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Gold Metrics
// ============================================================================

pub mod gold {
    use super::MetricName;

    pub fn table_written(table: &str, rows: usize) {
        ::metrics::counter!(MetricName::GoldTablesWritten.as_str()).increment(1);
        ::metrics::counter!(MetricName::GoldRowsWritten.as_str(), "table" => table.to_string())
            .increment(rows as u64);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::GoldDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Quality Gate Metrics
// ============================================================================

pub mod quality_gate {
    use super::MetricName;

    pub fn verdict(passed: bool, violations: usize, warnings: usize) {
        let name = if passed {
            MetricName::QualityGatePassed
        } else {
            MetricName::QualityGateFailed
        };
        ::metrics::counter!(name.as_str()).increment(1);
        ::metrics::counter!(MetricName::QualityViolations.as_str()).increment(violations as u64);
        ::metrics::counter!(MetricName::QualityWarnings.as_str()).increment(warnings as u64);
    }
}

/// Count a failed stage, labelled by stage name
pub fn stage_failed(stage: &str) {
    ::metrics::counter!(MetricName::StageFailures.as_str(), "stage" => stage.to_string()).increment(1);
}
