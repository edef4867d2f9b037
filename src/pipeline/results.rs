//! Result envelopes returned by every stage.
//!
//! Each envelope carries `success`, an optional `error` and its stage-specific
//! fields. The quality gate reads them and the audit trail stores them as JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::QualityMetrics;
use crate::pipeline::processing::schema::SchemaDrift;

/// A single value written to the metrics sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl From<usize> for MetricValue {
    fn from(value: usize) -> Self {
        MetricValue::Number(value as f64)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Number(value)
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Flag(value)
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

/// Common view over the stage envelopes.
pub trait StageOutcome {
    fn stage(&self) -> &'static str;
    fn succeeded(&self) -> bool;
    fn error(&self) -> Option<&str>;

    /// Named values handed to the metrics sink once the stage has succeeded.
    fn metrics(&self) -> Vec<(&'static str, MetricValue)>;
}

/// JSON form of an envelope, as stored in the audit trail.
pub fn envelope_json<T: Serialize>(result: &T) -> Value {
    serde_json::to_value(result).unwrap_or(Value::Null)
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageOutcome for HealthResult {
    fn stage(&self) -> &'static str {
        "Health"
    }

    fn succeeded(&self) -> bool {
        self.success
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn metrics(&self) -> Vec<(&'static str, MetricValue)> {
        vec![("attempts", MetricValue::Number(self.attempts as f64))]
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BronzeResult {
    pub success: bool,
    pub total_records: usize,
    pub pages_processed: usize,
    pub output_folder: Option<String>,
    pub ingestion_duration: String,
    pub ingestion_date: String,
    pub api_latency_ms: f64,
    pub run_id: Option<String>,
    /// sha256 hex of every landed page, keyed by file name.
    pub page_checksums: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BronzeResult {
    pub fn failed(ingestion_date: &str, duration: String, error: impl ToString) -> Self {
        Self {
            success: false,
            ingestion_date: ingestion_date.to_string(),
            ingestion_duration: duration,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

impl StageOutcome for BronzeResult {
    fn stage(&self) -> &'static str {
        "Bronze"
    }

    fn succeeded(&self) -> bool {
        self.success
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn metrics(&self) -> Vec<(&'static str, MetricValue)> {
        vec![
            ("pages_processed", self.pages_processed.into()),
            ("total_records", self.total_records.into()),
            ("ingestion_duration", self.ingestion_duration.clone().into()),
            ("api_latency_ms", self.api_latency_ms.into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SilverResult {
    pub success: bool,
    /// Rows after deduplication and name filtering.
    pub records: usize,
    /// Rows before deduplication and name filtering.
    pub records_received: usize,
    pub output_file: Option<String>,
    pub null_name: f64,
    pub null_brewery_type: f64,
    pub null_city_state: f64,
    pub duplicate_id: f64,
    pub invalid_brewery_type: f64,
    pub schema_changed: bool,
    pub schema_missing_cols: Vec<String>,
    pub schema_extra_cols: Vec<String>,
    pub transform_duration: String,
    pub transform_date: String,
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SilverResult {
    pub fn failed(transform_date: &str, duration: String, error: impl ToString) -> Self {
        Self {
            success: false,
            transform_date: transform_date.to_string(),
            transform_duration: duration,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn with_drift(mut self, drift: &SchemaDrift) -> Self {
        self.schema_changed = drift.changed;
        self.schema_missing_cols = drift.missing.clone();
        self.schema_extra_cols = drift.extra.clone();
        self
    }

    pub fn with_metrics(mut self, metrics: &QualityMetrics) -> Self {
        let rounded = metrics.rounded();
        self.null_name = rounded.null_name;
        self.null_brewery_type = rounded.null_brewery_type;
        self.null_city_state = rounded.null_city_state;
        self.duplicate_id = rounded.duplicate_id;
        self.invalid_brewery_type = rounded.invalid_brewery_type;
        self
    }

    pub fn quality_metrics(&self) -> QualityMetrics {
        QualityMetrics {
            null_name: self.null_name,
            null_brewery_type: self.null_brewery_type,
            null_city_state: self.null_city_state,
            duplicate_id: self.duplicate_id,
            invalid_brewery_type: self.invalid_brewery_type,
        }
    }
}

impl StageOutcome for SilverResult {
    fn stage(&self) -> &'static str {
        "Silver"
    }

    fn succeeded(&self) -> bool {
        self.success
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn metrics(&self) -> Vec<(&'static str, MetricValue)> {
        vec![
            ("records_received_bronze", self.records_received.into()),
            ("records_transformed_silver", self.records.into()),
            ("null_name", self.null_name.into()),
            ("null_brewery_type", self.null_brewery_type.into()),
            ("null_city_state", self.null_city_state.into()),
            ("duplicate_id", self.duplicate_id.into()),
            ("invalid_brewery_type", self.invalid_brewery_type.into()),
            ("schema_changed", self.schema_changed.into()),
            ("schema_missing_cols", self.schema_missing_cols.join(",").into()),
            ("schema_extra_cols", self.schema_extra_cols.join(",").into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GoldResult {
    pub success: bool,
    /// Written file paths keyed by file name.
    pub output_files: BTreeMap<String, String>,
    /// The state x type table, the headline Gold output.
    pub output_file: Option<String>,
    pub records_received: usize,
    pub records_gold: usize,
    pub records_state: usize,
    pub records_type: usize,
    pub records_city: usize,
    pub duration: String,
    pub run_id: Option<String>,
    pub transform_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GoldResult {
    pub fn failed(transform_date: &str, duration: String, error: impl ToString) -> Self {
        Self {
            success: false,
            transform_date: transform_date.to_string(),
            duration,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

impl StageOutcome for GoldResult {
    fn stage(&self) -> &'static str {
        "Gold"
    }

    fn succeeded(&self) -> bool {
        self.success
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn metrics(&self) -> Vec<(&'static str, MetricValue)> {
        vec![
            ("records_received_silver", self.records_received.into()),
            ("records_generated_gold", self.records_gold.into()),
            ("records_state", self.records_state.into()),
            ("records_type", self.records_type.into()),
            ("records_city", self.records_city.into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityResult {
    pub success: bool,
    pub records_bronze: usize,
    pub records_silver: usize,
    pub silver_duration_sec: f64,
    pub invalid_brewery_type: f64,
    pub schema_changed: bool,
    pub schema_missing_cols: Vec<String>,
    pub schema_extra_cols: Vec<String>,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageOutcome for QualityResult {
    fn stage(&self) -> &'static str {
        "Quality"
    }

    fn succeeded(&self) -> bool {
        self.success
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn metrics(&self) -> Vec<(&'static str, MetricValue)> {
        vec![
            ("violations", self.violations.len().into()),
            ("warnings", self.warnings.len().into()),
            ("silver_duration_sec", self.silver_duration_sec.into()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_envelopes_carry_the_error() {
        let result = SilverResult::failed("2026-02-14", "0:00:00.100000".into(), "boom");
        assert!(!result.succeeded());
        assert_eq!(result.error(), Some("boom"));
        assert_eq!(result.transform_date, "2026-02-14");

        let json = envelope_json(&result);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn successful_envelopes_omit_the_error_field() {
        let result = GoldResult {
            success: true,
            ..Default::default()
        };
        assert!(envelope_json(&result).get("error").is_none());
    }

    #[test]
    fn silver_metrics_join_schema_columns() {
        let drift = SchemaDrift {
            missing: vec![],
            extra: vec!["city".into(), "phone".into()],
            changed: true,
        };
        let result = SilverResult {
            success: true,
            ..Default::default()
        }
        .with_drift(&drift);
        let metrics = result.metrics();
        let extra = metrics.iter().find(|(name, _)| *name == "schema_extra_cols").unwrap();
        assert_eq!(extra.1, MetricValue::Text("city,phone".into()));
        let changed = metrics.iter().find(|(name, _)| *name == "schema_changed").unwrap();
        assert_eq!(changed.1, MetricValue::Flag(true));
    }

    #[test]
    fn silver_rounds_quality_metrics() {
        let metrics = QualityMetrics {
            duplicate_id: 100.0 / 3.0,
            ..Default::default()
        };
        let result = SilverResult::default().with_metrics(&metrics);
        assert_eq!(result.duplicate_id, 33.33);
        assert_eq!(result.quality_metrics().duplicate_id, 33.33);
    }
}
