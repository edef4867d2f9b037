use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::pipeline::processing::schema::SchemaPolicy;
use crate::pipeline::results::{BronzeResult, GoldResult, SilverResult, StageOutcome};
use crate::timing::{parse_duration_seconds, round2};

/// Which check produced a violation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CheckKind {
    /// A previous stage reported failure
    UpstreamFailure,
    /// Silver kept too small a share of the Bronze records
    VolumeDrop,
    NullName,
    NullCityState,
    DuplicateId,
    InvalidBreweryType,
    /// Silver took longer than allowed
    Duration,
    SchemaMissing,
    SchemaExtra,
}

/// One failed threshold
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    pub check: CheckKind,
    /// Human-readable description, as reported in the aggregated failure
    pub message: String,
}

/// Figures the gate looked at, echoed back for the audit trail
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GateSummary {
    pub records_bronze: usize,
    pub records_silver: usize,
    pub silver_duration_sec: f64,
    pub invalid_brewery_type: f64,
    pub schema_changed: bool,
    pub schema_missing_cols: Vec<String>,
    pub schema_extra_cols: Vec<String>,
}

/// Outcome of one gate evaluation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateVerdict {
    pub passed: bool,
    pub violations: Vec<Violation>,
    /// Suspicious but non-fatal observations
    pub warnings: Vec<String>,
    pub summary: GateSummary,
}

impl GateVerdict {
    fn from_checks(violations: Vec<Violation>, warnings: Vec<String>, summary: GateSummary) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
            warnings,
            summary,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.message.clone()).collect()
    }

    /// Turn a failed verdict into a single `ThresholdViolation` error.
    pub fn into_result(self) -> Result<GateVerdict> {
        if self.passed {
            Ok(self)
        } else {
            Err(PipelineError::ThresholdViolation {
                violations: self.messages(),
            })
        }
    }
}

/// Named limits, each with its documented default. Unknown keys are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdConfig {
    pub min_silver_vs_bronze_ratio: f64,
    pub max_null_name_pct: f64,
    pub max_null_city_state_pct: f64,
    pub max_duplicate_id_pct: f64,
    pub max_invalid_brewery_type: f64,
    pub max_duration_seconds: f64,
    /// Below this Silver is suspiciously fast; only warns
    pub min_duration_seconds: f64,
    pub fail_on_schema_missing: bool,
    pub fail_on_schema_extra: bool,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            min_silver_vs_bronze_ratio: 0.7,
            max_null_name_pct: 5.0,
            max_null_city_state_pct: 10.0,
            max_duplicate_id_pct: 1.0,
            max_invalid_brewery_type: 1.0,
            max_duration_seconds: 180.0,
            min_duration_seconds: 0.1,
            fail_on_schema_missing: true,
            fail_on_schema_extra: false,
        }
    }
}

impl ThresholdConfig {
    /// The schema flags, shared with the Silver stage.
    pub fn schema_policy(&self) -> SchemaPolicy {
        SchemaPolicy {
            fail_on_missing: self.fail_on_schema_missing,
            fail_on_extra: self.fail_on_schema_extra,
        }
    }
}

/// Trait for implementing the run-level quality verdict
pub trait QualityGate {
    fn evaluate(&self, bronze: &BronzeResult, silver: &SilverResult, gold: &GoldResult) -> GateVerdict;
}

/// Default Quality Gate driven by a [`ThresholdConfig`]
pub struct DefaultQualityGate {
    pub config: ThresholdConfig,
}

impl DefaultQualityGate {
    /// Create a new Quality Gate with default thresholds
    pub fn new() -> Self {
        Self {
            config: ThresholdConfig::default(),
        }
    }

    /// Create a Quality Gate with custom thresholds
    pub fn with_config(config: ThresholdConfig) -> Self {
        Self { config }
    }

    fn upstream_failure(
        &self,
        bronze: &BronzeResult,
        silver: &SilverResult,
        gold: &GoldResult,
    ) -> Option<Violation> {
        let stages: [&dyn StageOutcome; 3] = [bronze, silver, gold];
        stages.iter().find(|s| !s.succeeded()).map(|s| Violation {
            check: CheckKind::UpstreamFailure,
            message: format!("QualityCheck: {} não retornou sucesso.", s.stage()),
        })
    }

    fn check_volume(&self, records_bronze: usize, records_silver: usize) -> Option<Violation> {
        if records_bronze == 0 {
            return None;
        }
        let min_ratio = self.config.min_silver_vs_bronze_ratio;
        let ratio = records_silver as f64 / records_bronze as f64;
        (ratio < min_ratio).then(|| Violation {
            check: CheckKind::VolumeDrop,
            message: format!(
                "Queda brusca: silver({}) / bronze({}) = {:.2} < {}",
                records_silver, records_bronze, ratio, min_ratio
            ),
        })
    }

    fn check_rates(&self, silver: &SilverResult) -> Vec<Violation> {
        let c = &self.config;
        let checks = [
            (CheckKind::NullName, "Null name alto", silver.null_name, c.max_null_name_pct),
            (
                CheckKind::NullCityState,
                "Null city/state alto",
                silver.null_city_state,
                c.max_null_city_state_pct,
            ),
            (
                CheckKind::DuplicateId,
                "Duplicados por ID alto",
                silver.duplicate_id,
                c.max_duplicate_id_pct,
            ),
            (
                CheckKind::InvalidBreweryType,
                "brewery_type inválido alto",
                silver.invalid_brewery_type,
                c.max_invalid_brewery_type,
            ),
        ];

        checks
            .into_iter()
            .filter(|(_, _, value, limit)| value > limit)
            .map(|(check, label, value, limit)| Violation {
                check,
                message: format!("{}: {:.2}% > {:.2}%", label, value, limit),
            })
            .collect()
    }

    fn check_duration(&self, seconds: f64, warnings: &mut Vec<String>) -> Option<Violation> {
        if seconds < self.config.min_duration_seconds {
            let warning = format!(
                "Duração abaixo: {:.2}s < {:.2}s (suspeito)",
                seconds, self.config.min_duration_seconds
            );
            warn!("{}", warning);
            warnings.push(warning);
        }
        (seconds > self.config.max_duration_seconds).then(|| Violation {
            check: CheckKind::Duration,
            message: format!(
                "Duração acima: {:.2}s > {:.2}s",
                seconds, self.config.max_duration_seconds
            ),
        })
    }

    fn check_schema(&self, silver: &SilverResult) -> Vec<Violation> {
        let mut violations = Vec::new();
        if !silver.schema_missing_cols.is_empty() && self.config.fail_on_schema_missing {
            violations.push(Violation {
                check: CheckKind::SchemaMissing,
                message: format!(
                    "Schema regression (colunas faltando): {:?}",
                    silver.schema_missing_cols
                ),
            });
        }
        if !silver.schema_extra_cols.is_empty() && self.config.fail_on_schema_extra {
            violations.push(Violation {
                check: CheckKind::SchemaExtra,
                message: format!("Schema change (colunas novas): {:?}", silver.schema_extra_cols),
            });
        }
        violations
    }
}

impl QualityGate for DefaultQualityGate {
    fn evaluate(&self, bronze: &BronzeResult, silver: &SilverResult, gold: &GoldResult) -> GateVerdict {
        if let Some(violation) = self.upstream_failure(bronze, silver, gold) {
            return GateVerdict::from_checks(vec![violation], Vec::new(), GateSummary::default());
        }

        // malformed durations count as zero
        let duration = parse_duration_seconds(&silver.transform_duration).unwrap_or(0.0);
        let summary = GateSummary {
            records_bronze: bronze.total_records,
            records_silver: silver.records,
            silver_duration_sec: round2(duration),
            invalid_brewery_type: round2(silver.invalid_brewery_type),
            schema_changed: silver.schema_changed,
            schema_missing_cols: silver.schema_missing_cols.clone(),
            schema_extra_cols: silver.schema_extra_cols.clone(),
        };

        let mut violations = Vec::new();
        let mut warnings = Vec::new();
        violations.extend(self.check_volume(summary.records_bronze, summary.records_silver));
        violations.extend(self.check_rates(silver));
        violations.extend(self.check_duration(duration, &mut warnings));
        violations.extend(self.check_schema(silver));

        GateVerdict::from_checks(violations, warnings, summary)
    }
}

impl Default for DefaultQualityGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bronze(total: usize) -> BronzeResult {
        BronzeResult {
            success: true,
            total_records: total,
            ..Default::default()
        }
    }

    fn silver(records: usize) -> SilverResult {
        SilverResult {
            success: true,
            records,
            records_received: records,
            transform_duration: "0:00:01.500000".to_string(),
            ..Default::default()
        }
    }

    fn gold() -> GoldResult {
        GoldResult {
            success: true,
            ..Default::default()
        }
    }

    fn has(verdict: &GateVerdict, check: CheckKind) -> bool {
        verdict.violations.iter().any(|v| v.check == check)
    }

    #[test]
    fn test_clean_run_passes() {
        let verdict = DefaultQualityGate::new().evaluate(&bronze(100), &silver(100), &gold());
        assert!(verdict.passed);
        assert!(verdict.violations.is_empty());
        assert_eq!(verdict.summary.silver_duration_sec, 1.5);
        assert!(verdict.into_result().is_ok());
    }

    #[test]
    fn test_null_name_above_limit() {
        let gate = DefaultQualityGate::new();
        let mut high = silver(100);
        high.null_name = 6.0;
        let verdict = gate.evaluate(&bronze(100), &high, &gold());
        assert!(!verdict.passed);
        assert!(verdict.messages().iter().any(|m| m.contains("Null name alto")));
        assert_eq!(verdict.messages()[0], "Null name alto: 6.00% > 5.00%");

        let mut low = silver(100);
        low.null_name = 4.0;
        assert!(!has(&gate.evaluate(&bronze(100), &low, &gold()), CheckKind::NullName));
    }

    #[test]
    fn test_volume_drop() {
        let gate = DefaultQualityGate::new();
        let verdict = gate.evaluate(&bronze(100), &silver(50), &gold());
        assert!(has(&verdict, CheckKind::VolumeDrop));
        assert_eq!(
            verdict.messages()[0],
            "Queda brusca: silver(50) / bronze(100) = 0.50 < 0.7"
        );

        assert!(!has(&gate.evaluate(&bronze(100), &silver(80), &gold()), CheckKind::VolumeDrop));
        assert!(!has(&gate.evaluate(&bronze(0), &silver(0), &gold()), CheckKind::VolumeDrop));
    }

    #[test]
    fn test_extra_columns_pass_by_default() {
        let mut drifted = silver(10);
        drifted.schema_changed = true;
        drifted.schema_extra_cols = vec!["city".to_string()];

        let verdict = DefaultQualityGate::new().evaluate(&bronze(10), &drifted, &gold());
        assert!(verdict.passed);
        assert!(verdict.summary.schema_changed);

        let strict = DefaultQualityGate::with_config(ThresholdConfig {
            fail_on_schema_extra: true,
            ..Default::default()
        });
        let verdict = strict.evaluate(&bronze(10), &drifted, &gold());
        assert_eq!(
            verdict.messages(),
            vec![r#"Schema change (colunas novas): ["city"]"#.to_string()]
        );
    }

    #[test]
    fn test_missing_columns_fail_by_default() {
        let mut drifted = silver(10);
        drifted.schema_missing_cols = vec!["state".to_string()];
        let verdict = DefaultQualityGate::new().evaluate(&bronze(10), &drifted, &gold());
        assert!(has(&verdict, CheckKind::SchemaMissing));
    }

    #[test]
    fn test_all_checks_are_reported_together() {
        let mut bad = silver(10);
        bad.null_name = 50.0;
        bad.null_city_state = 50.0;
        bad.duplicate_id = 2.0;
        bad.invalid_brewery_type = 3.0;
        bad.transform_duration = "0:05:00".to_string();

        let verdict = DefaultQualityGate::new().evaluate(&bronze(100), &bad, &gold());
        assert_eq!(verdict.violations.len(), 6);

        match verdict.into_result() {
            Err(PipelineError::ThresholdViolation { violations }) => {
                assert_eq!(violations.len(), 6);
                assert!(violations.contains(&"Duração acima: 300.00s > 180.00s".to_string()));
            }
            other => panic!("expected threshold violation, got {:?}", other),
        }
    }

    #[test]
    fn test_fast_run_only_warns() {
        let mut fast = silver(10);
        fast.transform_duration = "0:00:00.010000".to_string();
        let verdict = DefaultQualityGate::new().evaluate(&bronze(10), &fast, &gold());
        assert!(verdict.passed);
        assert_eq!(verdict.warnings.len(), 1);
        assert!(verdict.warnings[0].starts_with("Duração abaixo"));
    }

    #[test]
    fn test_malformed_duration_reads_as_zero() {
        let mut odd = silver(10);
        odd.transform_duration = "soon".to_string();
        let verdict = DefaultQualityGate::new().evaluate(&bronze(10), &odd, &gold());
        assert_eq!(verdict.summary.silver_duration_sec, 0.0);
        assert!(verdict.passed);

        odd.transform_duration = "99999999999999999:00:00".to_string();
        let verdict = DefaultQualityGate::new().evaluate(&bronze(10), &odd, &gold());
        assert_eq!(verdict.summary.silver_duration_sec, 0.0);
    }

    #[test]
    fn test_upstream_failure_short_circuits() {
        let mut failed = silver(10);
        failed.success = false;
        failed.null_name = 90.0;

        let verdict = DefaultQualityGate::new().evaluate(&bronze(10), &failed, &gold());
        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), 1);
        assert_eq!(verdict.violations[0].check, CheckKind::UpstreamFailure);
        assert!(verdict.violations[0].message.contains("Silver"));
    }

    #[test]
    fn test_thresholds_deserialize_with_defaults() {
        let config: ThresholdConfig =
            serde_json::from_str(r#"{"max_null_name_pct": 2.5, "unknown_key": 1}"#).unwrap();
        assert_eq!(config.max_null_name_pct, 2.5);
        assert_eq!(config.min_silver_vs_bronze_ratio, 0.7);
        assert!(config.fail_on_schema_missing);
    }
}
