//! Minimal JSON-Schema checks applied to tool arguments before dispatch.

use serde_json::Value;

/// Check `args` against an object schema: required keys, declared property
/// types (`string`, `integer`, `number`, `boolean`, `array`, `object`,
/// `null`), `enum` membership and array item types.
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(obj) = args.as_object() else {
        return Err(format!("arguments must be a JSON object, got {}", type_name(args)));
    };

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for key in &required {
        match obj.get(*key) {
            None | Some(Value::Null) => {
                return Err(format!("missing required argument '{key}'"));
            }
            Some(_) => {}
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, value) in obj {
        let Some(prop) = properties.get(key) else {
            if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                return Err(format!("unexpected argument '{key}'"));
            }
            continue;
        };
        if value.is_null() && !required.contains(&key.as_str()) {
            continue;
        }
        check_value(key, prop, value)?;
    }
    Ok(())
}

fn check_value(key: &str, prop: &Value, value: &Value) -> Result<(), String> {
    if let Some(expected) = prop.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| matches_type(t, value)) {
            return Err(format!(
                "argument '{key}' must be of type {}, got {}",
                allowed.join("|"),
                type_name(value)
            ));
        }
    }

    if let Some(options) = prop.get("enum").and_then(Value::as_array)
        && !options.contains(value)
    {
        return Err(format!("argument '{key}' must be one of {}", Value::Array(options.clone())));
    }

    if let (Some(items), Some(values)) = (prop.get("items"), value.as_array()) {
        for (i, item) in values.iter().enumerate() {
            check_value(&format!("{key}[{i}]"), items, item)?;
        }
    }
    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
