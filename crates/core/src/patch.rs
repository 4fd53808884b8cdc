use serde_json::Value;

/// Apply a JSON merge patch (RFC 7386) to `target` in place.
///
/// Object members in `patch` overwrite or extend `target`; a `null` member
/// removes the key. Any non-object patch replaces `target` entirely.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}
