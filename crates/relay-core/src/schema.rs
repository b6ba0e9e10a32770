//! Schema adapter — the external validation-engine interface a host plugs
//! in ("given a schema and a value, report structured errors"). A minimal
//! JSON-Schema-subset adapter is provided so the executor has something to
//! validate against out of the box; host code is expected to swap in a
//! real engine via the extension manager.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema validation failed with {} error(s)", .errors.len())]
    Validation { errors: Vec<SchemaFieldError> },
    #[error("schema not found: {0}")]
    NotFound(String),
    #[error("schema parse error: {0}")]
    Parse(String),
    #[error("circular schema reference: {0}")]
    CircularRef(String),
}

impl SchemaError {
    pub fn code(&self) -> &'static str {
        match self {
            SchemaError::Validation { .. } => "SCHEMA_VALIDATION_ERROR",
            SchemaError::NotFound(_) => "SCHEMA_NOT_FOUND",
            SchemaError::Parse(_) => "SCHEMA_PARSE_ERROR",
            SchemaError::CircularRef(_) => "SCHEMA_CIRCULAR_REF",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaFieldError {
    pub field: String,
    pub code: String,
    pub message: String,
}

/// Consumed by the executor at steps 6 and 9. A real deployment plugs a
/// fuller JSON Schema (or protobuf/avro) engine in through the extension
/// manager's `validator` point; `BasicSchemaAdapter` below only checks
/// `type`, `required`, and `properties`, enough for the object-shaped
/// schemas used for `inputSchema`/`outputSchema`.
pub trait SchemaAdapter: Send + Sync {
    fn validate(&self, schema: &Value, value: &Value) -> Vec<SchemaFieldError>;
}

#[derive(Debug, Default)]
pub struct BasicSchemaAdapter;

impl SchemaAdapter for BasicSchemaAdapter {
    fn validate(&self, schema: &Value, value: &Value) -> Vec<SchemaFieldError> {
        let mut errors = Vec::new();
        walk(schema, value, "", &mut errors);
        errors
    }
}

fn walk(schema: &Value, value: &Value, path: &str, errors: &mut Vec<SchemaFieldError>) {
    let Some(schema_obj) = schema.as_object() else {
        return;
    };

    if let Some(Value::String(expected_type)) = schema_obj.get("type") {
        if !type_matches(expected_type, value) {
            errors.push(SchemaFieldError {
                field: path.to_string(),
                code: "TYPE_MISMATCH".to_string(),
                message: format!("expected type '{}' at '{}'", expected_type, path),
            });
            return;
        }
    }

    if expected_is_object(schema_obj) {
        let Some(value_obj) = value.as_object() else {
            return;
        };
        if let Some(Value::Array(required)) = schema_obj.get("required") {
            for req in required {
                if let Some(key) = req.as_str() {
                    if !value_obj.contains_key(key) {
                        errors.push(SchemaFieldError {
                            field: field_path(path, key),
                            code: "REQUIRED_FIELD_MISSING".to_string(),
                            message: format!("missing required field '{}'", key),
                        });
                    }
                }
            }
        }
        if let Some(Value::Object(properties)) = schema_obj.get("properties") {
            for (key, sub_schema) in properties {
                if let Some(sub_value) = value_obj.get(key) {
                    walk(sub_schema, sub_value, &field_path(path, key), errors);
                }
            }
        }
    }
}

fn expected_is_object(schema_obj: &serde_json::Map<String, Value>) -> bool {
    match schema_obj.get("type") {
        Some(Value::String(t)) => t == "object",
        // Schemas without an explicit `type` but with `properties` are
        // treated as object schemas, matching common JSON Schema usage.
        None => schema_obj.contains_key("properties"),
        _ => false,
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn field_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_missing_required_field() {
        let schema = serde_json::json!({
            "type": "object",
            "required": ["name"],
            "properties": { "name": { "type": "string" } }
        });
        let value = serde_json::json!({});
        let errors = BasicSchemaAdapter.validate(&schema, &value);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "name");
    }

    #[test]
    fn passes_matching_value() {
        let schema = serde_json::json!({
            "type": "object",
            "required": ["name"],
            "properties": { "name": { "type": "string" } }
        });
        let value = serde_json::json!({ "name": "World" });
        assert!(BasicSchemaAdapter.validate(&schema, &value).is_empty());
    }
}
