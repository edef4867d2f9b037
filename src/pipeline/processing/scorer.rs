//! Quality indicators over the staged (standardized, not yet filtered) rows.

use std::collections::HashSet;

use crate::constants::ALLOWED_BREWERY_TYPES;
use crate::domain::QualityMetrics;
use crate::pipeline::processing::normalize::StagedDataset;

/// Share of `count` in `total` as a percentage. Zero when `total` is zero.
pub fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

/// Compute the five quality percentages.
///
/// Columns absent from the whole batch read as null. An absent `id` column
/// means nothing can be duplicated, so that rate stays at zero.
pub fn score(snapshot: &StagedDataset) -> QualityMetrics {
    let total = snapshot.len();
    if total == 0 {
        return QualityMetrics::default();
    }

    let mut null_name = 0;
    let mut null_type = 0;
    let mut null_city_state = 0;
    let mut invalid_type = 0;
    for record in &snapshot.records {
        if record.name.is_none() {
            null_name += 1;
        }
        match record.brewery_type.as_deref() {
            None => null_type += 1,
            Some(t) if !ALLOWED_BREWERY_TYPES.contains(&t) => invalid_type += 1,
            Some(_) => {}
        }
        if record.city.is_none() || record.state.is_none() {
            null_city_state += 1;
        }
    }

    let duplicates = if snapshot.has_column("id") {
        let mut seen = HashSet::new();
        snapshot
            .records
            .iter()
            .filter(|r| !seen.insert(r.id.as_deref()))
            .count()
    } else {
        0
    };

    QualityMetrics {
        null_name: percent(null_name, total),
        null_brewery_type: percent(null_type, total),
        null_city_state: percent(null_city_state, total),
        duplicate_id: percent(duplicates, total),
        invalid_brewery_type: percent(invalid_type, total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::normalize::StagedRecord;

    fn row(id: Option<&str>, name: Option<&str>, kind: Option<&str>, city: Option<&str>, state: Option<&str>) -> StagedRecord {
        StagedRecord {
            id: id.map(String::from),
            name: name.map(String::from),
            brewery_type: kind.map(String::from),
            city: city.map(String::from),
            state: state.map(String::from),
            ..Default::default()
        }
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn empty_snapshot_scores_zero() {
        assert_eq!(score(&StagedDataset::default()), QualityMetrics::default());
    }

    #[test]
    fn counts_every_indicator() {
        let snapshot = StagedDataset {
            columns: columns(&["id", "name", "brewery_type", "city", "state"]),
            records: vec![
                row(Some("1"), Some("a"), Some("micro"), Some("x"), Some("ca")),
                row(Some("1"), None, Some("taproom"), Some("x"), None),
                row(Some("2"), Some("b"), None, None, Some("ny")),
                row(Some("3"), Some("c"), Some("closed"), Some("y"), Some("ny")),
            ],
        };
        let metrics = score(&snapshot);
        assert_eq!(metrics.null_name, 25.0);
        assert_eq!(metrics.null_brewery_type, 25.0);
        assert_eq!(metrics.null_city_state, 50.0);
        assert_eq!(metrics.duplicate_id, 25.0);
        assert_eq!(metrics.invalid_brewery_type, 25.0);
    }

    #[test]
    fn absent_columns_read_as_null_except_id() {
        let snapshot = StagedDataset {
            columns: columns(&["name"]),
            records: vec![
                row(None, Some("a"), None, None, None),
                row(None, Some("b"), None, None, None),
            ],
        };
        let metrics = score(&snapshot);
        assert_eq!(metrics.null_city_state, 100.0);
        assert_eq!(metrics.null_brewery_type, 100.0);
        assert_eq!(metrics.duplicate_id, 0.0);
        assert_eq!(metrics.invalid_brewery_type, 0.0);
    }

    #[test]
    fn null_ids_collide_with_each_other() {
        let snapshot = StagedDataset {
            columns: columns(&["id", "name"]),
            records: vec![
                row(None, Some("a"), None, None, None),
                row(None, Some("b"), None, None, None),
            ],
        };
        assert_eq!(score(&snapshot).duplicate_id, 50.0);
    }

    #[test]
    fn percent_of_nothing_is_zero() {
        assert_eq!(percent(3, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }
}
