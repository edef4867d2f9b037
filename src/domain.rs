//! Data shapes shared across the stages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::constants::{
    CANONICAL_COLUMNS, GOLD_BY_CITY_STATE, GOLD_BY_STATE, GOLD_BY_STATE_TYPE, GOLD_BY_TYPE,
};
use crate::error::{PipelineError, Result};
use crate::timing::round2;

/// A record exactly as the source returned it. Fields drift between releases.
pub type RawRecord = Map<String, Value>;

/// One landed page of the source API.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub file_name: String,
    pub records: Vec<RawRecord>,
}

/// Sort key of a landed page file: its trailing page number, then its name.
///
/// Files without a number sort after numbered ones.
pub fn page_sort_key(file_name: &str) -> (u64, &str) {
    let stem = file_name.strip_suffix(".json").unwrap_or(file_name);
    let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let number = stem[stem.len() - digits..].parse().unwrap_or(u64::MAX);
    (number, file_name)
}

/// Every raw record of one batch, in page order.
#[derive(Debug, Clone, Default)]
pub struct RawDataset {
    columns: Vec<String>,
    records: Vec<RawRecord>,
}

impl RawDataset {
    /// Concatenate pages; columns keep the order in which they were first seen.
    pub fn from_pages(pages: Vec<RawPage>) -> Self {
        let mut dataset = Self::default();
        for page in pages {
            for record in page.records {
                dataset.push(record);
            }
        }
        dataset
    }

    pub fn from_records(records: Vec<RawRecord>) -> Self {
        let mut dataset = Self::default();
        for record in records {
            dataset.push(record);
        }
        dataset
    }

    fn push(&mut self, record: RawRecord) {
        for key in record.keys() {
            if !self.columns.iter().any(|c| c == key) {
                self.columns.push(key.clone());
            }
        }
        self.records.push(record);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A row of the canonical Silver dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedRecord {
    pub id: Option<String>,
    pub name: String,
    pub brewery_type: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location: Option<Value>,
    pub has_geo: Option<bool>,
    pub processing_date: Option<String>,
}

impl CleanedRecord {
    /// Value of a canonical column, `Null` for unknown columns.
    pub fn column_value(&self, column: &str) -> Value {
        match column {
            "id" => opt_string(&self.id),
            "name" => Value::String(self.name.clone()),
            "brewery_type" => opt_string(&self.brewery_type),
            "city" => opt_string(&self.city),
            "state" => opt_string(&self.state),
            "country" => opt_string(&self.country),
            "latitude" => opt_number(self.latitude),
            "longitude" => opt_number(self.longitude),
            "location" => self.location.clone().unwrap_or(Value::Null),
            "has_geo" => self.has_geo.map(Value::Bool).unwrap_or(Value::Null),
            "processing_date" => opt_string(&self.processing_date),
            _ => Value::Null,
        }
    }
}

fn opt_string(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}

fn opt_number(value: Option<f64>) -> Value {
    value
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// The Silver dataset: canonical columns present in the batch plus the rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CleanedDataset {
    pub columns: Vec<String>,
    pub records: Vec<CleanedRecord>,
}

impl CleanedDataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new(self.columns.clone());
        for record in &self.records {
            table.push_row(self.columns.iter().map(|c| record.column_value(c)).collect());
        }
        table
    }

    /// Rebuild the typed dataset from a persisted Silver snapshot.
    pub fn from_table(table: &Table) -> Result<Self> {
        for column in &table.columns {
            if !CANONICAL_COLUMNS.contains(&column.as_str()) {
                return Err(PipelineError::parse(
                    "silver snapshot",
                    format!("unexpected column '{}'", column),
                ));
            }
        }

        let mut records = Vec::with_capacity(table.rows.len());
        for (index, row) in table.rows.iter().enumerate() {
            if row.len() != table.columns.len() {
                return Err(PipelineError::parse(
                    "silver snapshot",
                    format!("row {} has {} values for {} columns", index, row.len(), table.columns.len()),
                ));
            }
            let get = |name: &str| cell(table, row, name);
            let name = get("name").as_str().map(str::to_string).ok_or_else(|| {
                PipelineError::parse("silver snapshot", format!("row {} has no name", index))
            })?;
            records.push(CleanedRecord {
                id: get("id").as_str().map(str::to_string),
                name,
                brewery_type: get("brewery_type").as_str().map(str::to_string),
                city: get("city").as_str().map(str::to_string),
                state: get("state").as_str().map(str::to_string),
                country: get("country").as_str().map(str::to_string),
                latitude: get("latitude").as_f64(),
                longitude: get("longitude").as_f64(),
                location: Some(get("location").clone()).filter(|v| !v.is_null()),
                has_geo: get("has_geo").as_bool(),
                processing_date: get("processing_date").as_str().map(str::to_string),
            });
        }

        Ok(Self {
            columns: table.columns.clone(),
            records,
        })
    }
}

static NULL: Value = Value::Null;

fn cell<'a>(table: &Table, row: &'a [Value], name: &str) -> &'a Value {
    table
        .column_index(name)
        .and_then(|i| row.get(i))
        .unwrap_or(&NULL)
}

/// Column-ordered snapshot persisted for Silver and Gold datasets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Deterministic serialized form; identical tables give identical bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Quality indicators of one Silver run, as percentages in 0..=100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub null_name: f64,
    pub null_brewery_type: f64,
    pub null_city_state: f64,
    pub duplicate_id: f64,
    pub invalid_brewery_type: f64,
}

impl QualityMetrics {
    pub fn rounded(&self) -> Self {
        Self {
            null_name: round2(self.null_name),
            null_brewery_type: round2(self.null_brewery_type),
            null_city_state: round2(self.null_city_state),
            duplicate_id: round2(self.duplicate_id),
            invalid_brewery_type: round2(self.invalid_brewery_type),
        }
    }
}

/// The four Gold count tables.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateReport {
    pub by_state_type: Table,
    pub by_state: Table,
    pub by_type: Table,
    pub by_city_state: Table,
}

impl AggregateReport {
    /// Tables keyed by their dataset name, in write order.
    pub fn tables(&self) -> [(&'static str, &Table); 4] {
        [
            (GOLD_BY_STATE_TYPE, &self.by_state_type),
            (GOLD_BY_STATE, &self.by_state),
            (GOLD_BY_TYPE, &self.by_type),
            (GOLD_BY_CITY_STATE, &self.by_city_state),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn page_files_sort_by_number_past_three_digits() {
        let mut names = vec!["page_1000.json", "page_101.json", "notes.json", "page_002.json"];
        names.sort_by(|a, b| page_sort_key(a).cmp(&page_sort_key(b)));
        assert_eq!(names, vec!["page_002.json", "page_101.json", "page_1000.json", "notes.json"]);
    }

    #[test]
    fn raw_dataset_keeps_first_seen_column_order() {
        let pages = vec![
            RawPage {
                file_name: "page_001.json".into(),
                records: vec![record(json!({"id": "1", "name": "A"}))],
            },
            RawPage {
                file_name: "page_002.json".into(),
                records: vec![record(json!({"id": "2", "city": "x", "name": "B"}))],
            },
        ];
        let dataset = RawDataset::from_pages(pages);
        assert_eq!(dataset.len(), 2);
        assert!(dataset.has_column("city"));
        assert_eq!(dataset.columns().len(), 3);
    }

    #[test]
    fn cleaned_dataset_survives_a_table_roundtrip() {
        let dataset = CleanedDataset {
            columns: vec!["id".into(), "name".into(), "state".into(), "latitude".into()],
            records: vec![CleanedRecord {
                id: Some("b-1".into()),
                name: "brew a".into(),
                brewery_type: None,
                city: None,
                state: Some("california".into()),
                country: None,
                latitude: Some(34.5),
                longitude: None,
                location: None,
                has_geo: None,
                processing_date: None,
            }],
        };
        let table = dataset.to_table();
        assert_eq!(table.rows[0], vec![json!("b-1"), json!("brew a"), json!("california"), json!(34.5)]);
        assert_eq!(CleanedDataset::from_table(&table).unwrap(), dataset);
    }

    #[test]
    fn snapshot_with_unknown_column_is_rejected() {
        let mut table = Table::new(vec!["id".into(), "phone".into()]);
        table.push_row(vec![json!("1"), json!("555")]);
        assert!(CleanedDataset::from_table(&table).is_err());
    }
}
