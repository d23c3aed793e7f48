//! JSON Schema sanitization for Kiro API compatibility.
//!
//! Kiro's API is stricter about JSON Schema than Anthropic's.
//! This module cleans up schemas to avoid validation errors.

use serde_json::Value;

/// Sanitize a JSON Schema for Kiro compatibility.
///
/// Removes:
/// - Any property name starting with `$` (e.g. `$schema`, `$ref`), recursively
/// - A `null` schema becomes `{}`
pub fn sanitize_json_schema(schema: &Value) -> Value {
    match schema {
        Value::Null => Value::Object(serde_json::Map::new()),
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (key, value) in map {
                if key.starts_with('$') {
                    continue;
                }
                result.insert(key.clone(), sanitize_json_schema(value));
            }
            Value::Object(result)
        }
        Value::Array(arr) => {
            Value::Array(arr.iter().map(sanitize_json_schema).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keep_empty_required() {
        let schema = json!({
            "type": "object",
            "properties": {},
            "required": []
        });
        let result = sanitize_json_schema(&schema);
        assert_eq!(result.get("required"), Some(&json!([])));
    }

    #[test]
    fn test_keep_nonempty_required() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"}
            },
            "required": ["name"]
        });
        let result = sanitize_json_schema(&schema);
        assert!(result.get("required").is_some());
    }

    #[test]
    fn test_null_schema_becomes_empty_object() {
        let result = sanitize_json_schema(&Value::Null);
        assert_eq!(result, json!({}));
    }

    #[test]
    fn test_strip_dollar_prefixed_keys() {
        let schema = json!({
            "type": "object",
            "$schema": "http://json-schema.org/draft-07/schema#",
            "$ref": "#/definitions/Foo",
            "properties": {
                "name": {"type": "string", "$comment": "internal note"}
            }
        });
        let result = sanitize_json_schema(&schema);
        assert!(result.get("$schema").is_none());
        assert!(result.get("$ref").is_none());
        let name = result.get("properties").unwrap().get("name").unwrap();
        assert!(name.get("$comment").is_none());
    }

    #[test]
    fn test_keeps_additional_properties() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false
        });
        let result = sanitize_json_schema(&schema);
        assert_eq!(result.get("additionalProperties"), Some(&json!(false)));
    }

    #[test]
    fn test_recursive_sanitization() {
        let schema = json!({
            "type": "object",
            "properties": {
                "inner": {
                    "type": "object",
                    "$comment": "drop me",
                    "required": []
                }
            }
        });
        let result = sanitize_json_schema(&schema);
        let inner = result
            .get("properties")
            .unwrap()
            .get("inner")
            .unwrap();
        assert!(inner.get("$comment").is_none());
        assert_eq!(inner.get("required"), Some(&json!([])));
    }
}
