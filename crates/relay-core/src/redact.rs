//! Schema- and name-driven redaction of sensitive input fields.

use serde_json::Value;

const REDACTED: &str = "***REDACTED***";
const SECRET_PREFIX: &str = "_secret_";

/// Walks `schema` alongside `inputs`, replacing any value at a path marked
/// `x-sensitive: true` with the redaction literal, then runs a second,
/// name-based pass over the *result* that redacts every key starting with
/// `_secret_` at any nesting level (a belt-and-braces fallback that must
/// run after schema redaction, catching anything the schema pass missed).
/// Operates on a deep copy; the caller's original value is left untouched.
pub fn redact_sensitive(inputs: &Value, schema: &Value) -> Value {
    let mut out = inputs.clone();
    redact_by_schema(schema, &mut out);
    redact_secret_prefixed(&mut out);
    out
}

fn redact_by_schema(schema: &Value, value: &mut Value) {
    let Some(schema_obj) = schema.as_object() else {
        return;
    };

    if matches!(schema_obj.get("x-sensitive"), Some(Value::Bool(true))) && !value.is_null() {
        *value = Value::String(REDACTED.to_string());
        return;
    }

    if let (Some(Value::Object(properties)), Some(value_obj)) =
        (schema_obj.get("properties"), value.as_object_mut())
    {
        for (key, sub_schema) in properties {
            if let Some(sub_value) = value_obj.get_mut(key) {
                redact_by_schema(sub_schema, sub_value);
            }
        }
    }

    if let (Some(items_schema), Some(value_arr)) = (schema_obj.get("items"), value.as_array_mut())
    {
        for item in value_arr.iter_mut() {
            redact_by_schema(items_schema, item);
        }
    }
}

fn redact_secret_prefixed(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, sub) in map.iter_mut() {
                if key.starts_with(SECRET_PREFIX) && !sub.is_null() {
                    *sub = Value::String(REDACTED.to_string());
                } else {
                    redact_secret_prefixed(sub);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_secret_prefixed(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_sensitive_schema_field_without_mutating_original() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "password": { "type": "string", "x-sensitive": true },
                "name": { "type": "string" }
            }
        });
        let original = serde_json::json!({ "password": "hunter2", "name": "World" });
        let redacted = redact_sensitive(&original, &schema);

        assert_eq!(redacted["password"], "***REDACTED***");
        assert_eq!(redacted["name"], "World");
        assert_eq!(original["password"], "hunter2", "original must be unchanged");
    }

    #[test]
    fn redacts_secret_prefixed_keys_at_any_depth() {
        let original = serde_json::json!({
            "outer": { "_secret_token": "abc", "visible": 1 }
        });
        let redacted = redact_sensitive(&original, &serde_json::json!({}));
        assert_eq!(redacted["outer"]["_secret_token"], "***REDACTED***");
        assert_eq!(redacted["outer"]["visible"], 1);
    }
}
