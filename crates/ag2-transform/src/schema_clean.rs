//! Cleans Anthropic-style `input_schema` JSON (JSON Schema draft-ish) into
//! the shape Gemini's `parametersJsonSchema` tolerates.
//!
//! Rules (see module tests for the exact before/after shapes):
//! - drop `$schema`, `additionalProperties`, `format`, `default`, `uniqueItems`
//! - flatten numeric/string validation constraints into `description`
//! - collapse a `type` union containing `"null"` down to the non-null member
//! - uppercase every `type` value (Gemini's schema uses `STRING`/`OBJECT`/…)
//!
//! Applying this twice must be a no-op (P7): every rule above either deletes
//! a key outright or normalizes a value into a form the rule itself already
//! accepts as clean.

use serde_json::{Map, Value};

const DROPPED_KEYS: &[&str] = &["$schema", "additionalProperties", "format", "default", "uniqueItems"];

const CONSTRAINT_KEYS: &[&str] = &[
    "minLength",
    "maxLength",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "minItems",
    "maxItems",
    "minProperties",
    "maxProperties",
    "pattern",
    "multipleOf",
];

pub fn clean_input_schema(schema: &Value) -> Value {
    let mut value = schema.clone();
    clean_in_place(&mut value);
    value
}

fn clean_in_place(value: &mut Value) {
    match value {
        Value::Object(map) => clean_object(map),
        Value::Array(items) => {
            for item in items.iter_mut() {
                clean_in_place(item);
            }
        }
        _ => {}
    }
}

fn clean_object(map: &mut Map<String, Value>) {
    for key in DROPPED_KEYS {
        map.remove(*key);
    }

    let mut constraint_notes = Vec::new();
    for key in CONSTRAINT_KEYS {
        if let Some(constraint) = map.remove(*key) {
            constraint_notes.push(format!("{key}: {constraint}"));
        }
    }
    if !constraint_notes.is_empty() {
        let mut description = map
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        for note in constraint_notes {
            if !description.is_empty() {
                description.push_str("; ");
            }
            description.push_str(&note);
        }
        map.insert("description".to_string(), Value::String(description));
    }

    if let Some(type_value) = map.get("type").cloned() {
        let collapsed = collapse_nullable_type(type_value);
        map.insert("type".to_string(), uppercase_type(collapsed));
    }

    if let Some(Value::Object(properties)) = map.get_mut("properties") {
        for (_, prop_schema) in properties.iter_mut() {
            clean_in_place(prop_schema);
        }
    }
    if let Some(items) = map.get_mut("items") {
        clean_in_place(items);
    }
    for combinator in ["anyOf", "oneOf", "allOf"] {
        if let Some(Value::Array(variants)) = map.get_mut(combinator) {
            for variant in variants.iter_mut() {
                clean_in_place(variant);
            }
        }
    }
}

fn collapse_nullable_type(type_value: Value) -> Value {
    match type_value {
        Value::Array(members) => {
            let mut non_null: Vec<Value> = members
                .into_iter()
                .filter(|member| member.as_str() != Some("null"))
                .collect();
            if non_null.len() == 1 {
                non_null.remove(0)
            } else {
                Value::Array(non_null)
            }
        }
        other => other,
    }
}

fn uppercase_type(type_value: Value) -> Value {
    match type_value {
        Value::String(s) => Value::String(s.to_uppercase()),
        Value::Array(items) => Value::Array(items.into_iter().map(uppercase_type).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_disallowed_keys_and_uppercases_type() {
        let input = json!({
            "type": "object",
            "$schema": "http://json-schema.org/draft-07/schema#",
            "additionalProperties": false,
            "properties": {
                "name": {"type": "string", "format": "email", "default": "x"}
            }
        });
        let cleaned = clean_input_schema(&input);
        assert_eq!(cleaned["type"], json!("OBJECT"));
        assert!(cleaned.get("$schema").is_none());
        assert!(cleaned.get("additionalProperties").is_none());
        assert_eq!(cleaned["properties"]["name"]["type"], json!("STRING"));
        assert!(cleaned["properties"]["name"].get("format").is_none());
    }

    #[test]
    fn flattens_constraints_into_description() {
        let input = json!({"type": "string", "minLength": 1, "maxLength": 10});
        let cleaned = clean_input_schema(&input);
        let description = cleaned["description"].as_str().unwrap();
        assert!(description.contains("minLength: 1"));
        assert!(description.contains("maxLength: 10"));
        assert!(cleaned.get("minLength").is_none());
    }

    #[test]
    fn collapses_nullable_union() {
        let input = json!({"type": ["string", "null"]});
        let cleaned = clean_input_schema(&input);
        assert_eq!(cleaned["type"], json!("STRING"));
    }

    #[test]
    fn is_idempotent() {
        let input = json!({
            "type": ["integer", "null"],
            "minimum": 0,
            "items": {"type": "string", "uniqueItems": true}
        });
        let once = clean_input_schema(&input);
        let twice = clean_input_schema(&once);
        assert_eq!(once, twice);
    }
}
