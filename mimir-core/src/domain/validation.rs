// mimir-core/src/domain/validation.rs
//
// A JSON-Schema *subset* validator (§6): `type`, `properties`, `required`,
// `enum`, `minimum`, `maximum`, `oneOf` (each branch carrying its own
// `required`). `default` and `format` are read by callers that need them
// but are not enforced here; any other keyword is ignored. This backs
// both plugin config validation (§4.B) and context value schema
// validation (§4.A) — both need the same narrow subset, nothing more.

use serde_json::Value;

pub fn validate(value: &Value, schema: &Value) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(one_of) = schema_obj.get("oneOf").and_then(|v| v.as_array()) {
        let mut errors = Vec::new();
        for branch in one_of {
            match validate(value, branch) {
                Ok(()) => return Ok(()),
                Err(e) => errors.push(e),
            }
        }
        return Err(format!("matched none of the oneOf branches: [{}]", errors.join("; ")));
    }

    if let Some(type_name) = schema_obj.get("type").and_then(|v| v.as_str()) {
        check_type(value, type_name)?;
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(|v| v.as_array())
        && !allowed.contains(value)
    {
        return Err(format!("value {value} is not one of the allowed enum values"));
    }

    if let Some(min) = schema_obj.get("minimum").and_then(|v| v.as_f64())
        && let Some(n) = value.as_f64()
        && n < min
    {
        return Err(format!("value {n} is below minimum {min}"));
    }

    if let Some(max) = schema_obj.get("maximum").and_then(|v| v.as_f64())
        && let Some(n) = value.as_f64()
        && n > max
    {
        return Err(format!("value {n} is above maximum {max}"));
    }

    if let Some(properties) = schema_obj.get("properties").and_then(|v| v.as_object()) {
        let obj = value
            .as_object()
            .ok_or_else(|| "expected an object to validate properties".to_string())?;

        if let Some(required) = schema_obj.get("required").and_then(|v| v.as_array()) {
            for req in required {
                let Some(name) = req.as_str() else { continue };
                if !obj.contains_key(name) {
                    return Err(format!("missing required property '{name}'"));
                }
            }
        }

        for (key, sub_schema) in properties {
            if let Some(sub_value) = obj.get(key) {
                validate(sub_value, sub_schema)?;
            }
        }
    }

    Ok(())
}

fn check_type(value: &Value, type_name: &str) -> Result<(), String> {
    let matches = match type_name {
        "object" => value.is_object(),
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        _ => true,
    };
    if matches {
        Ok(())
    } else {
        Err(format!("expected type '{type_name}', got {value}"))
    }
}
