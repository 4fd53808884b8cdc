use crate::model::PathSegment;

/// A signature pattern that could not be parsed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid pattern '{pattern}' at position {position}: {message}")]
pub struct SfsError {
    pub pattern: String,
    pub position: usize,
    pub message: String,
}

impl SfsError {
    pub fn new(pattern: &str, position: usize, message: impl Into<String>) -> Self {
        SfsError {
            pattern: pattern.to_owned(),
            position,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DiffError {
    /// `kind` is the qualified `prefix/version/name` when known, the bare name otherwise.
    #[error("signature compilation on kind {kind} failed: {source}")]
    Compile {
        kind: String,
        pattern: String,
        #[source]
        source: SfsError,
    },
    #[error("path {} does not resolve in spec", render_path(.path))]
    PathNotFound { path: Vec<PathSegment> },
}

fn render_path(path: &[PathSegment]) -> String {
    let parts: Vec<String> = path.iter().map(|s| s.to_string()).collect();
    format!("'{}'", parts.join("."))
}
