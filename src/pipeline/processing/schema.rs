//! Schema drift detection between the columns a batch carries and the
//! columns the pipeline expects.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::constants::DEFAULT_EXPECTED_SCHEMA;

/// A set of normalized (trimmed, lower-cased, non-empty) column names.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    columns: BTreeSet<String>,
}

impl SchemaDescriptor {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns = columns
            .into_iter()
            .map(|c| c.as_ref().trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        Self { columns }
    }

    /// The OpenBreweryDB column list.
    pub fn default_expected() -> Self {
        Self::new(DEFAULT_EXPECTED_SCHEMA)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains(&column.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    /// Compare this (observed) schema against `expected`.
    pub fn diff(&self, expected: &SchemaDescriptor) -> SchemaDrift {
        let missing: Vec<String> = expected.columns.difference(&self.columns).cloned().collect();
        let extra: Vec<String> = self.columns.difference(&expected.columns).cloned().collect();
        let changed = !missing.is_empty() || !extra.is_empty();
        SchemaDrift {
            missing,
            extra,
            changed,
        }
    }
}

/// Difference between an observed and an expected schema. Both lists are sorted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaDrift {
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    pub changed: bool,
}

/// What schema drift is allowed to do to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaPolicy {
    pub fail_on_missing: bool,
    pub fail_on_extra: bool,
}

impl Default for SchemaPolicy {
    fn default() -> Self {
        Self {
            fail_on_missing: true,
            fail_on_extra: false,
        }
    }
}

/// Compare observed columns against expected ones, case-insensitively.
pub fn validate<O, E>(observed: O, expected: E) -> SchemaDrift
where
    O: IntoIterator,
    O::Item: AsRef<str>,
    E: IntoIterator,
    E::Item: AsRef<str>,
{
    SchemaDescriptor::new(observed).diff(&SchemaDescriptor::new(expected))
}
