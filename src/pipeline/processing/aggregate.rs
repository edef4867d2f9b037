//! Gold aggregations over the cleaned dataset.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::{AggregateReport, CleanedDataset, CleanedRecord, Table};
use crate::error::{PipelineError, Result};

pub const STATE_TYPE_COUNT: &str = "breweries_per_state_type";
pub const STATE_COUNT: &str = "breweries_per_state";
pub const TYPE_COUNT: &str = "brewery_per_type";
pub const CITY_STATE_COUNT: &str = "brewery_per_city_state";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortOrder {
    CountDescending,
    KeyAscending,
}

/// Build all four count tables. Any empty table fails the whole aggregation.
pub fn aggregate(dataset: &CleanedDataset) -> Result<AggregateReport> {
    let by_state_type = count_by(
        dataset,
        &["state", "brewery_type"],
        STATE_TYPE_COUNT,
        |r| Some(vec![r.state.clone()?, r.brewery_type.clone()?]),
        SortOrder::CountDescending,
    );
    let by_state = count_by(
        dataset,
        &["state"],
        STATE_COUNT,
        |r| Some(vec![r.state.clone()?]),
        SortOrder::CountDescending,
    );
    let by_type = count_by(
        dataset,
        &["brewery_type"],
        TYPE_COUNT,
        |r| Some(vec![r.brewery_type.clone()?]),
        SortOrder::KeyAscending,
    );
    let by_city_state = count_by(
        dataset,
        &["city", "state"],
        CITY_STATE_COUNT,
        |r| Some(vec![r.city.clone()?, r.state.clone()?]),
        SortOrder::CountDescending,
    );

    for (label, table) in [
        ("state x brewery_type", &by_state_type),
        ("breweries_per_state", &by_state),
        ("brewery_type", &by_type),
        ("city x state", &by_city_state),
    ] {
        if table.is_empty() {
            return Err(PipelineError::EmptyResult(format!(
                "Aggregation {} produced no rows",
                label
            )));
        }
    }

    Ok(AggregateReport {
        by_state_type,
        by_state,
        by_type,
        by_city_state,
    })
}

/// Group rows by the key `key_of` extracts and count them. Rows whose key has
/// a null component yield `None` and are left out.
fn count_by<F>(
    dataset: &CleanedDataset,
    key_columns: &[&str],
    count_column: &str,
    key_of: F,
    ordering: SortOrder,
) -> Table
where
    F: Fn(&CleanedRecord) -> Option<Vec<String>>,
{
    let mut counts: BTreeMap<Vec<String>, u64> = BTreeMap::new();
    for record in &dataset.records {
        if let Some(key) = key_of(record) {
            *counts.entry(key).or_insert(0) += 1;
        }
    }

    let mut groups: Vec<(Vec<String>, u64)> = counts.into_iter().collect();
    if ordering == SortOrder::CountDescending {
        // stable: equal counts stay in ascending key order
        groups.sort_by(|a, b| b.1.cmp(&a.1));
    }

    let mut columns: Vec<String> = key_columns.iter().map(|c| c.to_string()).collect();
    columns.push(count_column.to_string());
    let mut table = Table::new(columns);
    for (key, count) in groups {
        let mut row: Vec<Value> = key.into_iter().map(Value::String).collect();
        row.push(Value::from(count));
        table.push_row(row);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str, kind: Option<&str>, city: Option<&str>, state: Option<&str>) -> CleanedRecord {
        CleanedRecord {
            id: None,
            name: name.to_string(),
            brewery_type: kind.map(String::from),
            city: city.map(String::from),
            state: state.map(String::from),
            country: None,
            latitude: None,
            longitude: None,
            location: None,
            has_geo: None,
            processing_date: None,
        }
    }

    fn dataset(records: Vec<CleanedRecord>) -> CleanedDataset {
        CleanedDataset {
            columns: vec!["name".into(), "brewery_type".into(), "city".into(), "state".into()],
            records,
        }
    }

    #[test]
    fn counts_are_sorted_descending_with_key_tiebreak() {
        let report = aggregate(&dataset(vec![
            record("a", Some("micro"), Some("austin"), Some("texas")),
            record("b", Some("micro"), Some("austin"), Some("texas")),
            record("c", Some("brewpub"), Some("denver"), Some("colorado")),
            record("d", Some("nano"), Some("boise"), Some("idaho")),
        ]))
        .unwrap();

        assert_eq!(report.by_state.columns, vec!["state", "breweries_per_state"]);
        assert_eq!(
            report.by_state.rows,
            vec![
                vec![json!("texas"), json!(2)],
                vec![json!("colorado"), json!(1)],
                vec![json!("idaho"), json!(1)],
            ]
        );
        assert_eq!(
            report.by_state_type.rows[0],
            vec![json!("texas"), json!("micro"), json!(2)]
        );
        assert_eq!(
            report.by_city_state.columns,
            vec!["city", "state", "brewery_per_city_state"]
        );
    }

    #[test]
    fn type_table_keeps_group_order() {
        let report = aggregate(&dataset(vec![
            record("a", Some("nano"), Some("x"), Some("s")),
            record("b", Some("micro"), Some("x"), Some("s")),
            record("c", Some("micro"), Some("x"), Some("s")),
            record("d", Some("brewpub"), Some("x"), Some("s")),
        ]))
        .unwrap();

        let keys: Vec<&Value> = report.by_type.rows.iter().map(|r| &r[0]).collect();
        assert_eq!(keys, vec![&json!("brewpub"), &json!("micro"), &json!("nano")]);
        assert_eq!(report.by_type.columns[1], "brewery_per_type");
    }

    #[test]
    fn null_keys_are_left_out() {
        let report = aggregate(&dataset(vec![
            record("a", Some("micro"), None, Some("ohio")),
            record("b", None, Some("akron"), Some("ohio")),
            record("c", Some("micro"), Some("akron"), None),
        ]))
        .unwrap();

        assert_eq!(report.by_state.rows, vec![vec![json!("ohio"), json!(2)]]);
        assert_eq!(report.by_state_type.len(), 1);
        assert_eq!(report.by_city_state.rows, vec![vec![json!("akron"), json!("ohio"), json!(1)]]);
        assert_eq!(report.by_type.rows, vec![vec![json!("micro"), json!(2)]]);
    }

    #[test]
    fn empty_aggregation_is_fatal() {
        let err = aggregate(&dataset(vec![record("a", Some("micro"), None, None)])).unwrap_err();
        match err {
            PipelineError::EmptyResult(msg) => assert!(msg.contains("state x brewery_type")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn identical_input_gives_identical_bytes() {
        let input = dataset(vec![
            record("a", Some("micro"), Some("austin"), Some("texas")),
            record("b", Some("large"), Some("dallas"), Some("texas")),
            record("c", Some("micro"), Some("denver"), Some("colorado")),
        ]);
        let first = aggregate(&input).unwrap();
        let second = aggregate(&input).unwrap();
        for ((name_a, a), (name_b, b)) in first.tables().iter().zip(second.tables().iter()) {
            assert_eq!(name_a, name_b);
            assert_eq!(a.to_json_bytes().unwrap(), b.to_json_bytes().unwrap());
        }
    }
}
