//! Structural validation of tool arguments against their JSON schema
//!
//! Only the subset of JSON Schema that `schemars` emits for argument structs
//! is interpreted: `type` (single or list), `required`, `properties`,
//! `additionalProperties: false`, `items`, `minimum`, `enum`, `allOf`,
//! `anyOf`/`oneOf` (any branch may match) and local `$ref`s into
//! `definitions`. Anything else is accepted as-is.

use schemars::JsonSchema;
use serde_json::{json, Map, Value};

/// Generate the input schema for an argument type
pub fn schema_for<T: JsonSchema>() -> Value {
    let root = schemars::schema_for!(T);
    match serde_json::to_value(root) {
        Ok(Value::Object(mut map)) => {
            map.remove("$schema");
            map.remove("title");
            Value::Object(map)
        }
        _ => json!({"type": "object"}),
    }
}

/// Schema for tools that take no arguments
pub fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}, "additionalProperties": false})
}

/// Check `value` against `schema`, returning a message naming the first
/// offending path
pub fn validate(schema: &Value, value: &Value) -> Result<(), String> {
    check(schema, schema, value, "arguments")
}

/// Resolve `#/definitions/Name` or `#/$defs/Name` against the root schema
fn resolve<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    let pointer = reference.strip_prefix('#')?;
    root.pointer(pointer)
}

fn check(root: &Value, schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let schema = match schema {
        Value::Bool(true) => return Ok(()),
        Value::Bool(false) => return Err(format!("{}: no value is allowed here", path)),
        Value::Object(map) => map,
        _ => return Ok(()),
    };

    if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        let target = resolve(root, reference)
            .ok_or_else(|| format!("{}: unresolved schema reference {}", path, reference))?;
        check(root, target, value, path)?;
    }

    if let Some(all) = schema.get("allOf").and_then(Value::as_array) {
        all.iter().try_for_each(|branch| check(root, branch, value, path))?;
    }

    for keyword in ["anyOf", "oneOf"] {
        if let Some(branches) = schema.get(keyword).and_then(Value::as_array) {
            let mut first_error = None;
            let matched = branches.iter().any(|branch| match check(root, branch, value, path) {
                Ok(()) => true,
                Err(e) => {
                    first_error.get_or_insert(e);
                    false
                }
            });
            if !matched {
                return Err(first_error.unwrap_or_else(|| format!("{}: no allowed shape matches", path)));
            }
        }
    }

    check_type(schema, value, path)?;

    if let (Some(minimum), Some(number)) = (schema.get("minimum").and_then(Value::as_f64), value.as_f64()) {
        if number < minimum {
            return Err(format!("{}: {} is below the minimum of {}", path, number, minimum));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{}: {} is not one of the allowed values", path, value));
        }
    }

    match value {
        Value::Object(fields) => check_object(root, schema, fields, path),
        Value::Array(items) => match schema.get("items") {
            Some(item_schema) => items
                .iter()
                .enumerate()
                .try_for_each(|(i, item)| check(root, item_schema, item, &format!("{}[{}]", path, i))),
            None => Ok(()),
        },
        _ => Ok(()),
    }
}

fn check_type(schema: &Map<String, Value>, value: &Value, path: &str) -> Result<(), String> {
    let allowed: Vec<&str> = match schema.get("type") {
        Some(Value::String(name)) => vec![name.as_str()],
        Some(Value::Array(names)) => names.iter().filter_map(Value::as_str).collect(),
        _ => return Ok(()),
    };

    if allowed.is_empty() || allowed.iter().any(|name| matches_type(name, value)) {
        Ok(())
    } else {
        Err(format!(
            "{}: expected {}, found {}",
            path,
            allowed.join(" or "),
            type_name(value)
        ))
    }
}

fn check_object(
    root: &Value,
    schema: &Map<String, Value>,
    fields: &Map<String, Value>,
    path: &str,
) -> Result<(), String> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        if let Some(missing) = required
            .iter()
            .filter_map(Value::as_str)
            .find(|name| !fields.contains_key(*name))
        {
            return Err(format!("{}: missing required field `{}`", path, missing));
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (name, field) in fields {
        match properties.and_then(|p| p.get(name)) {
            Some(field_schema) => check(root, field_schema, field, &format!("{}.{}", path, name))?,
            None if closed => return Err(format!("{}: unknown field `{}`", path, name)),
            None => {}
        }
    }
    Ok(())
}

fn matches_type(name: &str, value: &Value) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
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
