//! Per-collection validators loaded from `schemas/<collection>.json`.
//!
//! The files hold MongoDB `$jsonSchema` bodies. The MongoDB backend hands
//! them to the server verbatim; the local backend checks the subset used by
//! this project: `required` and the `bsonType` of declared properties
//! (including `items` of arrays).

use std::fs;
use std::path::Path;

use serde_json::Value;

use super::{Document, StoreError};

/// Reads and parses the validator for `collection` from `dir`.
pub fn load_validator(dir: &Path, collection: &str) -> Result<Value, StoreError> {
    let path = dir.join(format!("{}.json", collection));
    tracing::info!(collection, path = %path.display(), "loading collection schema");

    let raw = fs::read_to_string(&path).map_err(|e| {
        StoreError::Schema(format!("schema file not found: {} ({})", path.display(), e))
    })?;
    let schema: Value = serde_json::from_str(&raw).map_err(|e| {
        StoreError::Schema(format!(
            "schema file is not valid JSON: {} ({})",
            path.display(),
            e
        ))
    })?;
    if !schema.is_object() {
        return Err(StoreError::Schema(format!(
            "schema file must contain an object: {}",
            path.display()
        )));
    }
    Ok(schema)
}

/// Checks a document against a `$jsonSchema` body.
pub fn validate(schema: &Value, doc: &Document) -> Result<(), StoreError> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !doc.contains_key(field) {
                return Err(StoreError::Validation(format!(
                    "missing required field '{}'",
                    field
                )));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (field, rule) in properties {
        if let Some(value) = doc.get(field) {
            check_value(field, rule, value)?;
        }
    }
    Ok(())
}

fn check_value(field: &str, rule: &Value, value: &Value) -> Result<(), StoreError> {
    let allowed: Vec<&str> = match rule.get("bsonType") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => return Ok(()),
    };
    if !allowed.iter().any(|t| matches_bson_type(t, value)) {
        return Err(StoreError::Validation(format!(
            "field '{}' must be of type {}",
            field,
            allowed.join(" or ")
        )));
    }

    if let (Some(items), Value::Array(values)) = (rule.get("items"), value) {
        for item in values {
            check_value(field, items, item)?;
        }
    }
    Ok(())
}

// Dates and binary payloads travel as strings (RFC 3339 and base64).
fn matches_bson_type(bson_type: &str, value: &Value) -> bool {
    match bson_type {
        "string" | "date" | "binData" => value.is_string(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "bool" => value.is_boolean(),
        "int" | "long" => value.is_i64() || value.is_u64(),
        "double" | "decimal" | "number" => value.is_number(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "bsonType": "object",
            "required": ["id", "model_name"],
            "properties": {
                "id": {"bsonType": "string"},
                "model_name": {"bsonType": "string"},
                "tags": {"bsonType": "array", "items": {"bsonType": "string"}}
            }
        })
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn accepts_conforming_document() {
        let d = doc(json!({"id": "m1", "model_name": "gpt", "tags": ["a"], "extra": 3}));
        assert!(validate(&schema(), &d).is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = validate(&schema(), &doc(json!({"id": "m1"}))).unwrap_err();
        assert!(err.to_string().contains("model_name"));
    }

    #[test]
    fn rejects_wrong_types_including_array_items() {
        let d = doc(json!({"id": "m1", "model_name": 5}));
        assert!(matches!(validate(&schema(), &d), Err(StoreError::Validation(_))));

        let d = doc(json!({"id": "m1", "model_name": "gpt", "tags": ["a", 1]}));
        assert!(matches!(validate(&schema(), &d), Err(StoreError::Validation(_))));
    }

    #[test]
    fn loads_project_schema_files() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas");
        for name in crate::storage::REQUIRED_COLLECTIONS {
            let schema = load_validator(&dir, name).unwrap();
            assert_eq!(schema["bsonType"], "object");
        }
    }

    #[test]
    fn missing_schema_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_validator(dir.path(), "chats").unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
    }

    #[test]
    fn malformed_schema_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("chats.json"), "{ not json").unwrap();
        let err = load_validator(dir.path(), "chats").unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }
}
