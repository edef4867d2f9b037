//! Silver cleaning: turns the open raw records of a batch into the closed,
//! canonical dataset.
//!
//! Every step is a function from one snapshot to the next. The order matters:
//! quality metrics are taken after standardization but before deduplication
//! and name filtering, so they describe the raw-to-silver population.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, error, warn};

use crate::constants::{CANONICAL_COLUMNS, NULL_TOKENS};
use crate::domain::{CleanedDataset, CleanedRecord, QualityMetrics, RawDataset, RawRecord};
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::schema::{SchemaDescriptor, SchemaDrift, SchemaPolicy};
use crate::pipeline::processing::scorer;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// A canonical row before filtering. Unlike [`CleanedRecord`] the name may
/// still be null and coordinates are not yet coerced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StagedRecord {
    pub id: Option<String>,
    pub name: Option<String>,
    pub brewery_type: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<Value>,
    pub longitude: Option<Value>,
    pub location: Option<Value>,
    pub has_geo: Option<bool>,
    pub processing_date: Option<String>,
}

/// Canonical columns present in the batch plus the staged rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StagedDataset {
    pub columns: Vec<String>,
    pub records: Vec<StagedRecord>,
}

impl StagedDataset {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Everything the cleaner hands back to the Silver stage.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanOutcome {
    pub dataset: CleanedDataset,
    pub metrics: QualityMetrics,
    pub schema: SchemaDrift,
    /// Rows before deduplication and filtering.
    pub records_received: usize,
}

/// Run the full cleaning sequence over one batch.
pub fn clean(
    raw: &RawDataset,
    expected: &SchemaDescriptor,
    policy: SchemaPolicy,
) -> Result<CleanOutcome> {
    if raw.is_empty() {
        return Err(PipelineError::EmptyResult("No valid records loaded".to_string()));
    }

    let schema = SchemaDescriptor::new(raw.columns()).diff(expected);
    if !schema.missing.is_empty() {
        error!("[SCHEMA REGRESSION] Missing columns: {:?}", schema.missing);
    }
    if !schema.extra.is_empty() {
        warn!("[SCHEMA CHANGE] New columns detected: {:?}", schema.extra);
    }
    if policy.fail_on_missing && !schema.missing.is_empty() {
        return Err(PipelineError::SchemaRegression {
            missing: schema.missing,
            extra: schema.extra,
        });
    }

    let staged = stage_records(raw);
    let staged = standardize_strings(staged);
    let staged = coerce_coordinates(staged);

    let metrics = scorer::score(&staged);
    let records_received = staged.len();
    debug!(?metrics, records_received, "Quality indicators computed");

    let staged = drop_duplicate_ids(staged);
    let staged = drop_nameless(staged);
    let dataset = project(staged);

    Ok(CleanOutcome {
        dataset,
        metrics,
        schema,
        records_received,
    })
}

/// Map open records onto the canonical fields, keeping values as text.
pub fn stage_records(raw: &RawDataset) -> StagedDataset {
    let columns = CANONICAL_COLUMNS
        .iter()
        .filter(|c| raw.has_column(c))
        .map(|c| c.to_string())
        .collect();

    let records = raw.records().iter().map(stage_record).collect();
    StagedDataset { columns, records }
}

fn stage_record(record: &RawRecord) -> StagedRecord {
    let text = |key: &str| record.get(key).and_then(value_as_text);
    let raw_value = |key: &str| record.get(key).filter(|v| !v.is_null()).cloned();

    StagedRecord {
        id: text("id"),
        name: text("name"),
        brewery_type: text("brewery_type"),
        city: text("city"),
        state: text("state"),
        country: text("country"),
        latitude: raw_value("latitude"),
        longitude: raw_value("longitude"),
        location: raw_value("location"),
        has_geo: record.get("has_geo").and_then(Value::as_bool),
        processing_date: text("processing_date"),
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Trim, lower-case and collapse whitespace; null-like tokens become null.
pub fn standardize_text(value: &str) -> Option<String> {
    let lowered = value.trim().to_lowercase();
    let collapsed = WHITESPACE_RUN.replace_all(&lowered, " ").into_owned();
    if NULL_TOKENS.contains(&collapsed.as_str()) {
        None
    } else {
        Some(collapsed)
    }
}

pub fn standardize_strings(dataset: StagedDataset) -> StagedDataset {
    let standardize = |v: Option<String>| v.and_then(|s| standardize_text(&s));
    let records = dataset
        .records
        .into_iter()
        .map(|r| StagedRecord {
            name: standardize(r.name),
            city: standardize(r.city),
            state: standardize(r.state),
            brewery_type: standardize(r.brewery_type),
            ..r
        })
        .collect();
    StagedDataset {
        columns: dataset.columns,
        records,
    }
}

/// Numeric-or-null coercion; unparsable values become null rather than failing.
pub fn coerce_number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

pub fn coerce_coordinates(dataset: StagedDataset) -> StagedDataset {
    let coerce = |v: Option<Value>| {
        v.as_ref()
            .and_then(coerce_number)
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
    };
    let records = dataset
        .records
        .into_iter()
        .map(|r| StagedRecord {
            latitude: coerce(r.latitude),
            longitude: coerce(r.longitude),
            ..r
        })
        .collect();
    StagedDataset {
        columns: dataset.columns,
        records,
    }
}

/// Keep the first row of every id. Null ids are treated as one id.
pub fn drop_duplicate_ids(dataset: StagedDataset) -> StagedDataset {
    if !dataset.has_column("id") {
        return dataset;
    }
    let mut seen: HashSet<Option<String>> = HashSet::new();
    let records = dataset
        .records
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .collect();
    StagedDataset {
        columns: dataset.columns,
        records,
    }
}

pub fn drop_nameless(dataset: StagedDataset) -> StagedDataset {
    let records = dataset
        .records
        .into_iter()
        .filter(|r| r.name.is_some())
        .collect();
    StagedDataset {
        columns: dataset.columns,
        records,
    }
}

/// Final projection onto the closed record type.
pub fn project(dataset: StagedDataset) -> CleanedDataset {
    let records = dataset
        .records
        .into_iter()
        .filter_map(|r| {
            let name = r.name?;
            Some(CleanedRecord {
                id: r.id,
                name,
                brewery_type: r.brewery_type,
                city: r.city,
                state: r.state,
                country: r.country,
                latitude: r.latitude.as_ref().and_then(Value::as_f64),
                longitude: r.longitude.as_ref().and_then(Value::as_f64),
                location: r.location,
                has_geo: r.has_geo,
                processing_date: r.processing_date,
            })
        })
        .collect();
    CleanedDataset {
        columns: dataset.columns,
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(records: Value) -> RawDataset {
        let records = records
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect();
        RawDataset::from_records(records)
    }

    fn lenient() -> SchemaPolicy {
        SchemaPolicy {
            fail_on_missing: false,
            fail_on_extra: false,
        }
    }

    #[test]
    fn standardize_text_trims_lowercases_and_collapses() {
        assert_eq!(standardize_text("  Brew   A\tCo  "), Some("brew a co".to_string()));
        assert_eq!(standardize_text("None"), None);
        assert_eq!(standardize_text(" NaN "), None);
        assert_eq!(standardize_text("   "), None);
    }

    #[test]
    fn coerce_number_is_lenient() {
        assert_eq!(coerce_number(&json!("34.0")), Some(34.0));
        assert_eq!(coerce_number(&json!(-118.2)), Some(-118.2));
        assert_eq!(coerce_number(&json!("north")), None);
        assert_eq!(coerce_number(&json!("NaN")), None);
        assert_eq!(coerce_number(&json!(true)), None);
    }

    #[test]
    fn duplicate_metrics_reflect_the_prefilter_population() {
        let input = raw(json!([
            {"id": 1, "name": "A"},
            {"id": 2, "name": "B"},
            {"id": 2, "name": "B"}
        ]));
        let expected = SchemaDescriptor::new(["id", "name"]);
        let outcome = clean(&input, &expected, SchemaPolicy::default()).unwrap();

        assert_eq!(outcome.records_received, 3);
        assert_eq!(outcome.dataset.len(), 2);
        assert_eq!(outcome.metrics.rounded().duplicate_id, 33.33);
        assert_eq!(outcome.metrics.null_name, 0.0);
        assert_eq!(outcome.dataset.columns, vec!["id", "name"]);
    }

    #[test]
    fn first_occurrence_wins_and_nameless_rows_are_dropped() {
        let input = raw(json!([
            {"id": "a", "name": "First", "city": "X"},
            {"id": "a", "name": "Second", "city": "Y"},
            {"id": "b", "name": "none"},
            {"id": "c", "name": null}
        ]));
        let outcome = clean(&input, &SchemaDescriptor::new(["id"]), lenient()).unwrap();

        assert_eq!(outcome.dataset.len(), 1);
        assert_eq!(outcome.dataset.records[0].name, "first");
        assert_eq!(outcome.dataset.records[0].city.as_deref(), Some("x"));
        assert_eq!(outcome.metrics.rounded().null_name, 50.0);
        assert_eq!(outcome.metrics.duplicate_id, 25.0);
    }

    #[test]
    fn missing_columns_fail_fast_under_default_policy() {
        let input = raw(json!([{"id": "1", "name": "A", "website": "x"}]));
        let expected = SchemaDescriptor::new(["id", "name", "state"]);
        match clean(&input, &expected, SchemaPolicy::default()) {
            Err(PipelineError::SchemaRegression { missing, extra }) => {
                assert_eq!(missing, vec!["state"]);
                assert_eq!(extra, vec!["website"]);
            }
            other => panic!("expected schema regression, got {:?}", other),
        }
    }

    #[test]
    fn missing_columns_only_annotate_when_policy_allows() {
        let input = raw(json!([{"id": "1", "name": "A"}]));
        let expected = SchemaDescriptor::new(["id", "name", "state"]);
        let outcome = clean(&input, &expected, lenient()).unwrap();
        assert_eq!(outcome.schema.missing, vec!["state"]);
        assert!(outcome.schema.changed);
        assert_eq!(outcome.dataset.len(), 1);
    }

    #[test]
    fn empty_batches_are_rejected() {
        let err = clean(&RawDataset::default(), &SchemaDescriptor::default(), lenient()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyResult(_)));
    }

    #[test]
    fn projection_drops_unknown_columns_and_coerces_coordinates() {
        let input = raw(json!([{
            "id": "1",
            "name": "Brew A",
            "phone": "555",
            "latitude": "34.0",
            "longitude": "not-a-number",
            "state": "  New   York "
        }]));
        let outcome = clean(&input, &SchemaDescriptor::new(["id"]), lenient()).unwrap();
        let table = outcome.dataset.to_table();

        assert_eq!(table.columns, vec!["id", "name", "state", "latitude", "longitude"]);
        let row = &outcome.dataset.records[0];
        assert_eq!(row.latitude, Some(34.0));
        assert_eq!(row.longitude, None);
        assert_eq!(row.state.as_deref(), Some("new york"));
    }

    #[test]
    fn numeric_ids_and_names_are_read_as_text() {
        let input = raw(json!([{"id": 7, "name": 42}]));
        let outcome = clean(&input, &SchemaDescriptor::new(["id"]), lenient()).unwrap();
        assert_eq!(outcome.dataset.records[0].id.as_deref(), Some("7"));
        assert_eq!(outcome.dataset.records[0].name, "42");
    }

    #[test]
    fn cleaning_is_deterministic() {
        let input = raw(json!([
            {"id": "1", "name": "A", "state": "CA", "brewery_type": "micro"},
            {"id": "2", "name": "B", "state": "NY", "brewery_type": "brewpub"}
        ]));
        let expected = SchemaDescriptor::new(["id", "name"]);
        let first = clean(&input, &expected, SchemaPolicy::default()).unwrap();
        let second = clean(&input, &expected, SchemaPolicy::default()).unwrap();
        assert_eq!(
            first.dataset.to_table().to_json_bytes().unwrap(),
            second.dataset.to_table().to_json_bytes().unwrap()
        );
    }
}
