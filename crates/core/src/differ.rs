//! The diff engine: matches every intentful signature of a kind against an
//! entity's spec and status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::error::DiffError;
use crate::model::{Diff, DiffField, Kind, PathSegment, Spec, Status};
use crate::sanitize::{spec_for_diff, status_for_diff};
use crate::sfs::CompiledSfs;

/// Compiles signature patterns once and evaluates them on demand.
///
/// Cheap to share behind an `Arc`; the compiled-pattern cache is keyed by the
/// raw pattern text.
#[derive(Debug, Default)]
pub struct Differ {
    cache: Mutex<HashMap<String, Arc<CompiledSfs>>>,
}

impl Differ {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `pattern`, reusing a cached result when available.
    pub fn compile(&self, kind: &str, pattern: &str) -> Result<Arc<CompiledSfs>, DiffError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(compiled) = cache.get(pattern) {
            return Ok(Arc::clone(compiled));
        }
        let compiled = CompiledSfs::compile(pattern).map_err(|source| DiffError::Compile {
            kind: kind.to_owned(),
            pattern: pattern.to_owned(),
            source,
        })?;
        let compiled = Arc::new(compiled);
        cache.insert(pattern.to_owned(), Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Compile every signature of `kind`, failing on the first bad pattern.
    pub fn validate_kind(
        &self,
        provider_prefix: &str,
        provider_version: &str,
        kind: &Kind,
    ) -> Result<(), DiffError> {
        let qualified = format!("{}/{}/{}", provider_prefix, provider_version, kind.name);
        for sig in &kind.intentful_signatures {
            self.compile(&qualified, &sig.signature)?;
        }
        Ok(())
    }

    /// Lazily yield one [`Diff`] per signature that finds differences.
    ///
    /// Each call starts from scratch; nothing is retained between calls.
    pub fn diffs<'a>(&'a self, kind: &'a Kind, spec: &Spec, status: &Status) -> Diffs<'a> {
        Diffs {
            differ: self,
            kind,
            spec: spec_for_diff(spec),
            status: status_for_diff(status, kind.schema()),
            next: 0,
        }
    }

    /// Every diff of `kind`, in signature order.
    pub fn all_diffs(
        &self,
        kind: &Kind,
        spec: &Spec,
        status: &Status,
    ) -> Result<Vec<Diff>, DiffError> {
        self.diffs(kind, spec, status).collect()
    }
}

/// Resolve a diff field's path against `spec`.
pub fn get_diff_path_value<'v>(field: &DiffField, spec: &'v Spec) -> Result<&'v Value, DiffError> {
    let mut current = spec;
    for segment in &field.path {
        let next = match segment {
            PathSegment::Field(name) => current.get(name.as_str()),
            PathSegment::Index(i) => current.get(*i),
        };
        current = next.ok_or_else(|| DiffError::PathNotFound {
            path: field.path.clone(),
        })?;
    }
    Ok(current)
}

/// Iterator returned by [`Differ::diffs`].
pub struct Diffs<'a> {
    differ: &'a Differ,
    kind: &'a Kind,
    spec: Value,
    status: Value,
    next: usize,
}

impl Iterator for Diffs<'_> {
    type Item = Result<Diff, DiffError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(sig) = self.kind.intentful_signatures.get(self.next) {
            self.next += 1;
            let compiled = match self.differ.compile(&self.kind.name, &sig.signature) {
                Ok(c) => c,
                Err(e) => return Some(Err(e)),
            };
            let diff_fields = compiled.run(&self.spec, &self.status);
            if !diff_fields.is_empty() {
                return Some(Ok(Diff {
                    kind: self.kind.name.clone(),
                    intentful_signature: sig.clone(),
                    diff_fields,
                    handler_url: None,
                }));
            }
        }
        None
    }
}
