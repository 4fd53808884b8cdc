use async_trait::async_trait;
use intentful_core::{
    Entity, EntityRef, IntentWatcher, Kind, KindRef, Metadata, Provider, Spec, Status, Watchlist,
};

use crate::error::StorageError;
use crate::record::{EntityFilter, WatcherFilter, WatcherUpdate};

/// Transformation applied to the watchlist inside one atomic edit.
pub type WatchlistEdit<'a> = Box<dyn FnOnce(&mut Watchlist) + Send + 'a>;

/// Entity spec/status storage.
///
/// ## Versioning
///
/// `update_spec` is optimistic: the write is accepted only when
/// `metadata.spec_version` equals the stored version (or, for an entity that
/// does not exist, the highest version retained for that reference). The
/// stored version is then bumped by one.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared between the
/// reconciliation loops and the HTTP surface.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    /// Returns `Err(StorageError::EntityNotFound)` for absent or deleted entities.
    async fn get_entity(&self, entity_ref: &EntityRef) -> Result<Entity, StorageError>;

    /// Create or update the spec of an entity. Returns the new metadata.
    async fn update_spec(&self, metadata: &Metadata, spec: &Spec)
        -> Result<Metadata, StorageError>;

    /// Merge `status` into the stored status (JSON merge patch).
    ///
    /// With `expected_hash`, the write is rejected with
    /// `StatusHashConflict` unless it matches the stored `status_hash`.
    async fn update_status(
        &self,
        entity_ref: &EntityRef,
        status: &Status,
        expected_hash: Option<&str>,
    ) -> Result<Metadata, StorageError>;

    /// Overwrite the stored status.
    async fn replace_status(
        &self,
        entity_ref: &EntityRef,
        status: &Status,
        expected_hash: Option<&str>,
    ) -> Result<Metadata, StorageError>;

    /// Up to `batch_size` randomly chosen live entities of the given kinds.
    async fn list_random_intentful_specs(
        &self,
        batch_size: usize,
        kinds: &[KindRef],
    ) -> Result<Vec<(Metadata, Spec)>, StorageError>;

    async fn list_entities(
        &self,
        filter: &EntityFilter,
        exact_match: bool,
    ) -> Result<Vec<Entity>, StorageError>;

    /// Soft-delete: move the entity to the retention store.
    async fn delete_entity(&self, entity_ref: &EntityRef) -> Result<Entity, StorageError>;

    /// Highest `spec_version` ever recorded for `entity_ref`, live or retained.
    async fn highest_spec_version(&self, entity_ref: &EntityRef) -> Result<u64, StorageError>;
}

/// Storage of the single shared watchlist snapshot.
#[async_trait]
pub trait WatchlistStore: Send + Sync + 'static {
    async fn get_watchlist(&self) -> Result<Watchlist, StorageError>;

    /// Read-modify-write the watchlist as one unit.
    ///
    /// Edits are serialized against each other; the committed snapshot has
    /// its `version` bumped and is returned.
    async fn edit_watchlist<'a>(&self, edit: WatchlistEdit<'a>) -> Result<Watchlist, StorageError>;
}

#[async_trait]
pub trait WatcherStore: Send + Sync + 'static {
    async fn save_watcher(&self, watcher: &IntentWatcher) -> Result<(), StorageError>;

    async fn get_watcher(&self, uuid: &str) -> Result<IntentWatcher, StorageError>;

    async fn update_watcher(
        &self,
        uuid: &str,
        update: &WatcherUpdate,
    ) -> Result<IntentWatcher, StorageError>;

    async fn delete_watcher(&self, uuid: &str) -> Result<(), StorageError>;

    async fn list_watchers(&self, filter: &WatcherFilter)
        -> Result<Vec<IntentWatcher>, StorageError>;
}

#[async_trait]
pub trait ProviderStore: Send + Sync + 'static {
    /// Insert or wholesale replace a provider version.
    async fn save_provider(&self, provider: &Provider) -> Result<(), StorageError>;

    async fn get_provider(&self, prefix: &str, version: &str) -> Result<Provider, StorageError>;

    async fn list_providers(&self) -> Result<Vec<Provider>, StorageError>;

    async fn delete_provider(&self, prefix: &str, version: &str) -> Result<(), StorageError>;

    /// References to every differ-based kind of every registered provider.
    async fn get_intentful_kinds(&self) -> Result<Vec<KindRef>, StorageError>;

    async fn get_kind(&self, kind_ref: &KindRef) -> Result<Kind, StorageError> {
        let provider = self
            .get_provider(&kind_ref.provider_prefix, &kind_ref.provider_version)
            .await?;
        provider
            .find_kind(&kind_ref.kind)
            .cloned()
            .ok_or_else(|| StorageError::KindNotFound(kind_ref.to_string()))
    }
}

/// Everything the engine needs from a backend.
pub trait Storage: EntityStore + WatchlistStore + WatcherStore + ProviderStore {}

impl<T> Storage for T where T: EntityStore + WatchlistStore + WatcherStore + ProviderStore {}
