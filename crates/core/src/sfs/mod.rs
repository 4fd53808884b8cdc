//! Structured field selection (SFS) patterns.
//!
//! A pattern names the fields of an entity one intent handler is responsible
//! for. Compiling a pattern yields a [`CompiledSfs`] that can be run against any
//! number of spec/status pairs.
//!
//! ```text
//! path  := step ('.' step)*
//! step  := IDENT | '[' IDENT ']' | '{' path (',' path)* '}'
//! ```

mod eval;
mod lexer;
mod parser;

use serde_json::Value;

use crate::error::SfsError;
use crate::model::DiffField;

pub use parser::{Path, Step};

/// A parsed, ready-to-run signature pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSfs {
    source: String,
    path: Path,
}

impl CompiledSfs {
    pub fn compile(pattern: &str) -> Result<Self, SfsError> {
        let path = parser::parse(pattern)?;
        Ok(CompiledSfs {
            source: pattern.to_owned(),
            path,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Field-level differences between already sanitized `spec` and `status`.
    pub fn run(&self, spec: &Value, status: &Value) -> Vec<DiffField> {
        eval::run(&self.path, spec, status)
    }
}
