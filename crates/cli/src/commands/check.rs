use std::path::Path;
use std::process;

use intentful_core::{Differ, IntentfulBehaviour};

use super::read_provider;
use crate::{report_error, OutputFormat};

pub(crate) fn cmd_check(file: &Path, output: OutputFormat, quiet: bool) {
    let provider = match read_provider(file) {
        Ok(p) => p,
        Err(msg) => {
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let differ = Differ::new();
    let mut signatures = 0;
    for kind in &provider.kinds {
        if let Err(e) = differ.validate_kind(&provider.prefix, &provider.version, kind) {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
        if let Some(schema) = kind.schema() {
            if let Err(e) = jsonschema::validator_for(schema) {
                let msg = format!("kind '{}' has an invalid schema: {}", kind.name, e);
                report_error(&msg, output, quiet);
                process::exit(1);
            }
        }
        signatures += kind.intentful_signatures.len();
    }

    if quiet {
        return;
    }
    let intentful = provider
        .kinds
        .iter()
        .filter(|k| k.intentful_behaviour == IntentfulBehaviour::DifferBased)
        .count();
    match output {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "provider": provider.prefix,
                "version": provider.version,
                "kinds": provider.kinds.len(),
                "intentful_kinds": intentful,
                "signatures": signatures,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&report)
                    .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e))
            );
        }
        OutputFormat::Text => {
            println!(
                "ok: {}/{}: {} kinds ({} intentful), {} signatures",
                provider.prefix,
                provider.version,
                provider.kinds.len(),
                intentful,
                signatures
            );
        }
    }
}
