/// All errors that can be returned by a storage implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    /// No live entity with this reference.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// An entity with this reference already exists.
    #[error("entity already exists: {0}")]
    EntityExists(String),

    /// Optimistic concurrency conflict on a spec write. The caller's
    /// `spec_version` no longer matches the stored one.
    #[error("spec version conflict on entity {entity}: expected {expected}, current {current}")]
    SpecVersionConflict {
        entity: String,
        expected: u64,
        current: u64,
    },

    /// A status write carried a stale expected hash.
    #[error("status hash conflict on entity {entity}: expected {expected}, current {current}")]
    StatusHashConflict {
        entity: String,
        expected: String,
        current: String,
    },

    #[error("intent watcher not found: {0}")]
    WatcherNotFound(String),

    #[error("provider not found: {prefix}/{version}")]
    ProviderNotFound { prefix: String, version: String },

    #[error("kind not found: {0}")]
    KindNotFound(String),

    /// A backend-specific storage error (connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
