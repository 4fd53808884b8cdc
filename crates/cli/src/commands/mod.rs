pub(crate) mod check;
pub(crate) mod diff;

use std::path::Path;

use intentful_core::Provider;
use serde_json::Value;

pub(crate) fn read_json(path: &Path) -> Result<Value, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("invalid JSON in '{}': {}", path.display(), e))
}

pub(crate) fn read_provider(path: &Path) -> Result<Provider, String> {
    let value = read_json(path)?;
    serde_json::from_value(value)
        .map_err(|e| format!("invalid provider in '{}': {}", path.display(), e))
}
