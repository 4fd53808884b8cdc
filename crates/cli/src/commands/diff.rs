use std::path::Path;
use std::process;

use intentful_core::Differ;
use serde_json::Value;

use super::{read_json, read_provider};
use crate::{report_error, OutputFormat};

pub(crate) fn cmd_diff(
    provider: &Path,
    kind: &str,
    spec: &Path,
    status: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let provider = read_provider(provider).unwrap_or_else(|msg| fail(&msg, output, quiet));
    let Some(kind) = provider.find_kind(kind) else {
        let msg = format!(
            "kind '{}' not found in provider {}/{}",
            kind, provider.prefix, provider.version
        );
        fail(&msg, output, quiet);
    };
    let spec = read_json(spec).unwrap_or_else(|msg| fail(&msg, output, quiet));
    let status = match status {
        Some(path) => read_json(path).unwrap_or_else(|msg| fail(&msg, output, quiet)),
        None => Value::Null,
    };

    let differ = Differ::new();
    if let Err(e) = differ.validate_kind(&provider.prefix, &provider.version, kind) {
        fail(&e.to_string(), output, quiet);
    }
    let diffs = differ
        .all_diffs(kind, &spec, &status)
        .unwrap_or_else(|e| fail(&e.to_string(), output, quiet));

    // Diffs are always printed as JSON; --output only shapes errors.
    match serde_json::to_string_pretty(&diffs) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(&format!("serialization: {}", e), output, quiet),
    }
}

fn fail(msg: &str, output: OutputFormat, quiet: bool) -> ! {
    report_error(msg, output, quiet);
    process::exit(1);
}
