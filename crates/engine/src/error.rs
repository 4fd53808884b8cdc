use intentful_core::DiffError;
use intentful_storage::StorageError;

/// Errors surfaced by engine operations and loop bodies.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Diff(#[from] DiffError),

    /// A request was rejected before reaching storage (bad spec, bad schema).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// A spawned resolution task panicked or was cancelled.
    #[error("resolution task failed: {0}")]
    Task(String),
}

/// Failure talking to an intent handler. Always transient from the engine's
/// point of view: logged and turned into backoff.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HandlerError {
    #[error("handler at {url} unreachable: {message}")]
    Unreachable { url: String, message: String },

    #[error("handler at {url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("handler at {url} sent a malformed response: {message}")]
    MalformedResponse { url: String, message: String },

    #[error("handler task join error: {0}")]
    Join(String),
}
