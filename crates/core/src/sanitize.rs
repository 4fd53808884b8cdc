//! Cleanup applied to spec and status trees before patterns run against them.

use serde_json::Value;

/// Schema extension marking a field as written only by handlers.
pub const STATUS_ONLY_KEY: &str = "x-intentful";
pub const STATUS_ONLY_VALUE: &str = "status-only";

/// Recursively drop `null` object values and `null` array elements.
pub fn prune_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, prune_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(prune_nulls)
                .collect(),
        ),
        other => other,
    }
}

fn is_status_only(schema: &Value) -> bool {
    schema.get(STATUS_ONLY_KEY).and_then(Value::as_str) == Some(STATUS_ONLY_VALUE)
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(|m| m.is_empty())
}

/// Remove status-only fields from `status` following `schema`.
///
/// Returns `Null` when the whole value is status-only. Array elements left as
/// empty objects after stripping are dropped.
pub fn strip_status_only(schema: Option<&Value>, status: Value) -> Value {
    let Some(schema) = schema else {
        return status;
    };
    if is_status_only(schema) {
        return Value::Null;
    }
    match (schema.get("type").and_then(Value::as_str), status) {
        (Some("object"), Value::Object(map)) => {
            let properties = schema.get("properties");
            Value::Object(
                map.into_iter()
                    .filter_map(|(k, v)| {
                        let field_schema = properties.and_then(|p| p.get(&k));
                        match strip_status_only(field_schema, v) {
                            Value::Null => None,
                            kept => Some((k, kept)),
                        }
                    })
                    .collect(),
            )
        }
        (Some("array"), Value::Array(items)) => {
            let item_schema = schema.get("items");
            Value::Array(
                items
                    .into_iter()
                    .map(|item| strip_status_only(item_schema, item))
                    .filter(|item| !item.is_null() && !is_empty_object(item))
                    .collect(),
            )
        }
        (_, status) => status,
    }
}

/// Spec as patterns see it.
pub fn spec_for_diff(spec: &Value) -> Value {
    prune_nulls(spec.clone())
}

/// Status as patterns see it: nulls pruned, status-only fields removed.
pub fn status_for_diff(status: &Value, schema: Option<&Value>) -> Value {
    strip_status_only(schema, prune_nulls(status.clone()))
}
