use serde_json::{Map, Value};

/// Checks `input` against a JSON-schema subset and applies lenient coercions
/// (numeric strings, whole floats, "true"/"false", null optionals dropped).
pub fn validate_and_coerce(schema: &Value, input: Value) -> Result<Value, String> {
    let input = match input {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    coerce_value(schema, input, "params")
}

fn coerce_value(schema: &Value, value: Value, path: &str) -> Result<Value, String> {
    let expected = schema.get("type").and_then(Value::as_str);
    let value = match expected {
        Some("object") => coerce_object(schema, value, path)?,
        Some("array") => coerce_array(schema, value, path)?,
        Some("string") => match value {
            Value::String(s) => Value::String(s),
            Value::Number(n) => Value::String(n.to_string()),
            other => return Err(type_error(path, "string", &other)),
        },
        Some("integer") => coerce_integer(value, path)?,
        Some("number") => match value {
            Value::Number(n) => Value::Number(n),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("'{path}' must be a number"))?,
            other => return Err(type_error(path, "number", &other)),
        },
        Some("boolean") => match value {
            Value::Bool(b) => Value::Bool(b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
            other => return Err(type_error(path, "boolean", &other)),
        },
        _ => value,
    };

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(&value) {
            let options = allowed
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(format!("'{path}' must be one of: {options}"));
        }
    }
    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(format!("'{path}' must be at least {min}"));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(format!("'{path}' must be at most {max}"));
            }
        }
    }
    if let Some(s) = value.as_str() {
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if (s.trim().chars().count() as u64) < min {
                return Err(format!("'{path}' must not be empty"));
            }
        }
    }
    Ok(value)
}

fn coerce_object(schema: &Value, value: Value, path: &str) -> Result<Value, String> {
    let Value::Object(mut map) = value else {
        return Err(type_error(path, "object", &value));
    };
    map.retain(|_, v| !v.is_null());

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !map.contains_key(field) {
                return Err(format!("Missing required parameter '{field}'"));
            }
        }
    }
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, prop_schema) in properties {
            if let Some(current) = map.remove(name) {
                let child_path = if path == "params" {
                    name.clone()
                } else {
                    format!("{path}.{name}")
                };
                let coerced = coerce_value(prop_schema, current, child_path.as_str())?;
                map.insert(name.clone(), coerced);
            }
        }
    }
    Ok(Value::Object(map))
}

fn coerce_array(schema: &Value, value: Value, path: &str) -> Result<Value, String> {
    let Value::Array(items) = value else {
        return Err(type_error(path, "array", &value));
    };
    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
        if items.len() as u64 > max {
            return Err(format!("'{path}' accepts at most {max} items"));
        }
    }
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
        if (items.len() as u64) < min {
            return Err(format!("'{path}' needs at least {min} items"));
        }
    }
    let Some(item_schema) = schema.get("items") else {
        return Ok(Value::Array(items));
    };
    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        out.push(coerce_value(item_schema, item, format!("{path}[{idx}]").as_str())?);
    }
    Ok(Value::Array(out))
}

fn coerce_integer(value: Value, path: &str) -> Result<Value, String> {
    let parsed = match &value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .map(Value::from)
        .ok_or_else(|| type_error(path, "integer", &value))
}

fn type_error(path: &str, expected: &str, actual: &Value) -> String {
    let actual = match actual {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("'{path}' must be {expected}, got {actual}")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "lesson_id": {"type": "string", "minLength": 1},
                "offset": {"type": "integer", "minimum": 0},
                "confirm": {"type": "boolean"},
                "difficulty_level": {"type": "string", "enum": ["easy", "medium", "hard"]},
                "questions": {
                    "type": "array",
                    "maxItems": 2,
                    "items": {
                        "type": "object",
                        "properties": {"points": {"type": "integer"}},
                        "required": ["points"]
                    }
                }
            },
            "required": ["lesson_id"]
        })
    }

    #[test]
    fn coerces_planner_style_values() {
        let out = validate_and_coerce(
            &schema(),
            json!({"lesson_id": "l1", "offset": "1200", "confirm": "true", "extra": null}),
        )
        .expect("valid input");
        assert_eq!(out, json!({"lesson_id": "l1", "offset": 1200, "confirm": true}));
    }

    #[test]
    fn reports_missing_and_invalid_fields() {
        assert_eq!(
            validate_and_coerce(&schema(), Value::Null).expect_err("missing"),
            "Missing required parameter 'lesson_id'"
        );
        assert_eq!(
            validate_and_coerce(&schema(), json!({"lesson_id": "l", "difficulty_level": "extreme"}))
                .expect_err("enum"),
            "'difficulty_level' must be one of: easy, medium, hard"
        );
        assert_eq!(
            validate_and_coerce(&schema(), json!({"lesson_id": "l", "offset": -1}))
                .expect_err("minimum"),
            "'offset' must be at least 0"
        );
        assert_eq!(
            validate_and_coerce(
                &schema(),
                json!({"lesson_id": "l", "questions": [{"points": 1}, {"points": 1}, {"points": 1}]})
            )
            .expect_err("max items"),
            "'questions' accepts at most 2 items"
        );
        assert_eq!(
            validate_and_coerce(&schema(), json!({"lesson_id": "l", "questions": [{"points": "x"}]}))
                .expect_err("nested"),
            "'questions[0].points' must be integer, got string"
        );
    }
}
