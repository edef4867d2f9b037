use tracing::{error, info, instrument};

use crate::observability::metrics;
use crate::pipeline::processing::quality_gate::{DefaultQualityGate, QualityGate, ThresholdConfig};
use crate::pipeline::results::{BronzeResult, GoldResult, QualityResult, SilverResult};

/// Use case for the run-level quality verdict over the three stage results
pub struct QualityGateUseCase {
    quality_gate: Box<dyn QualityGate + Send + Sync>,
}

impl QualityGateUseCase {
    pub fn new(quality_gate: Box<dyn QualityGate + Send + Sync>) -> Self {
        Self { quality_gate }
    }

    /// Create a use case with the default quality gate
    pub fn with_default_quality_gate() -> Self {
        Self::new(Box::new(DefaultQualityGate::new()))
    }

    pub fn with_thresholds(thresholds: ThresholdConfig) -> Self {
        Self::new(Box::new(DefaultQualityGate::with_config(thresholds)))
    }

    /// Evaluate every check; a failed verdict carries the aggregated message as `error`.
    #[instrument(skip_all)]
    pub fn check(&self, bronze: &BronzeResult, silver: &SilverResult, gold: &GoldResult) -> QualityResult {
        let verdict = self.quality_gate.evaluate(bronze, silver, gold);
        metrics::quality_gate::verdict(verdict.passed, verdict.violations.len(), verdict.warnings.len());
        let summary = verdict.summary.clone();
        let violations = verdict.messages();
        let warnings = verdict.warnings.clone();
        let error = match verdict.into_result() {
            Ok(_) => {
                info!("QUALITY CHECK PASSED");
                None
            }
            Err(e) => {
                error!("{}", e);
                metrics::stage_failed("Quality");
                Some(e.to_string())
            }
        };

        QualityResult {
            success: error.is_none(),
            records_bronze: summary.records_bronze,
            records_silver: summary.records_silver,
            silver_duration_sec: summary.silver_duration_sec,
            invalid_brewery_type: summary.invalid_brewery_type,
            schema_changed: summary.schema_changed,
            schema_missing_cols: summary.schema_missing_cols,
            schema_extra_cols: summary.schema_extra_cols,
            violations,
            warnings,
            error,
        }
    }
}

impl Default for QualityGateUseCase {
    fn default() -> Self {
        Self::with_default_quality_gate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passing() -> (BronzeResult, SilverResult, GoldResult) {
        let bronze = BronzeResult {
            success: true,
            total_records: 100,
            ..Default::default()
        };
        let silver = SilverResult {
            success: true,
            records: 90,
            transform_duration: "0:00:02.500000".into(),
            ..Default::default()
        };
        let gold = GoldResult {
            success: true,
            ..Default::default()
        };
        (bronze, silver, gold)
    }

    #[test]
    fn passing_runs_have_no_error() {
        let (bronze, silver, gold) = passing();
        let result = QualityGateUseCase::default().check(&bronze, &silver, &gold);
        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.records_bronze, 100);
        assert_eq!(result.records_silver, 90);
        assert_eq!(result.silver_duration_sec, 2.5);
    }

    #[test]
    fn violations_are_aggregated_into_the_error() {
        let (bronze, mut silver, gold) = passing();
        silver.records = 50;
        silver.null_name = 6.0;
        let result = QualityGateUseCase::default().check(&bronze, &silver, &gold);
        assert!(!result.success);
        assert_eq!(result.violations.len(), 2);
        let error = result.error.unwrap();
        assert!(error.starts_with("QUALITY CHECK FAILED:\n- "));
        assert!(error.contains("Null name alto: 6.00% > 5.00%"));
    }

    #[test]
    fn custom_thresholds_are_honoured() {
        let (bronze, mut silver, gold) = passing();
        silver.null_name = 6.0;
        let thresholds = ThresholdConfig {
            max_null_name_pct: 10.0,
            ..Default::default()
        };
        let result = QualityGateUseCase::with_thresholds(thresholds).check(&bronze, &silver, &gold);
        assert!(result.success, "{:?}", result.violations);
    }
}
