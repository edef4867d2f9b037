use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::domain::RawRecord;
use crate::error::{PipelineError, Result};

/// The raw page schema shipped with the crate.
pub const RAW_PAGE_SCHEMA: &str = include_str!("../../schemas/raw_page.v1.json");

static RAW_PAGE_SCHEMA_JSON: Lazy<std::result::Result<Value, String>> =
    Lazy::new(|| serde_json::from_str(RAW_PAGE_SCHEMA).map_err(|e| e.to_string()));

static RAW_PAGE_VALIDATOR: Lazy<std::result::Result<JSONSchema, String>> =
    Lazy::new(|| match &*RAW_PAGE_SCHEMA_JSON {
        Ok(schema) => compile(schema),
        Err(e) => Err(e.clone()),
    });

/// Compile a schema. jsonschema 0.17 borrows the schema for the validator's lifetime.
pub fn compile(schema: &'static Value) -> std::result::Result<JSONSchema, String> {
    JSONSchema::options()
        .compile(schema)
        .map_err(|e| format!("Failed to compile JSON Schema: {}", e))
}

/// Every violation of `instance` against `validator`, as `message at path` lines.
pub fn violations(validator: &JSONSchema, instance: &Value) -> Vec<String> {
    match validator.validate(instance) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect(),
    }
}

/// Check a page payload against the raw page schema.
pub fn validate_raw_page(source_name: &str, instance: &Value) -> Result<()> {
    let validator = RAW_PAGE_VALIDATOR
        .as_ref()
        .map_err(|e| PipelineError::Configuration(e.clone()))?;
    let problems = violations(validator, instance);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::parse(source_name, problems.join("; ")))
    }
}

/// Validate and split a page payload into its records.
pub fn page_records(source_name: &str, payload: Value) -> Result<Vec<RawRecord>> {
    validate_raw_page(source_name, &payload)?;
    match payload {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect()),
        _ => Err(PipelineError::parse(source_name, "page is not a JSON array")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arrays_of_objects_are_valid() {
        let records = page_records("page 1", json!([{"id": "a", "name": "Brew"}, {}])).unwrap();
        assert_eq!(records.len(), 2);
        assert!(page_records("page 2", json!([])).unwrap().is_empty());
    }

    #[test]
    fn non_array_payloads_are_rejected() {
        let err = page_records("page 3", json!({"message": "rate limited"})).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn scalar_items_are_rejected_with_their_path() {
        let err = validate_raw_page("page 4", &json!([{"id": 1}, 7])).unwrap_err();
        assert!(err.to_string().contains("/1"), "{}", err);
    }
}
