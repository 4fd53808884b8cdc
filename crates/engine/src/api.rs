//! Entity API facade used by the HTTP surface and by intent handlers.

use std::sync::Arc;

use intentful_core::{
    Differ, Entity, EntityRef, IntentWatcher, IntentWatcherSummary, Kind, KindRef, Metadata,
    Provider, Spec, Status,
};
use intentful_storage::{EntityFilter, Storage, StorageError, WatcherFilter};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::info;

use crate::backoff::BackoffPolicy;
use crate::config::EngineConfig;
use crate::diff_resolver::DiffResolver;
use crate::error::EngineError;
use crate::handler::IntentHandler;
use crate::intent_resolver::IntentResolver;
use crate::listener::ChangeListener;
use crate::strategy::{EntityUpdate, IntentfulContext};

/// Capacity of the listener -> intent resolver channel.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// The three long-running loops of one engine, ready to be spawned.
pub struct Reconcilers<S: Storage> {
    pub diff_resolver: DiffResolver<S>,
    pub intent_resolver: IntentResolver<S>,
    pub change_listener: ChangeListener<S>,
}

pub struct Engine<S: Storage> {
    storage: Arc<S>,
    differ: Arc<Differ>,
    intentful: IntentfulContext<S>,
}

impl<S: Storage> Engine<S> {
    pub fn new(storage: Arc<S>) -> Self {
        let differ = Arc::new(Differ::new());
        Engine {
            intentful: IntentfulContext::new(Arc::clone(&storage), Arc::clone(&differ)),
            storage,
            differ,
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn differ(&self) -> &Arc<Differ> {
        &self.differ
    }

    // ── Providers ─────────────────────────────

    /// Compile every signature and schema of `provider`, then store it,
    /// replacing any earlier registration of the same version.
    pub async fn register_provider(&self, mut provider: Provider) -> Result<Provider, EngineError> {
        for kind in &provider.kinds {
            self.differ
                .validate_kind(&provider.prefix, &provider.version, kind)?;
            if let Some(schema) = kind.schema() {
                jsonschema::validator_for(schema).map_err(|e| {
                    EngineError::Validation(format!(
                        "kind '{}/{}/{}' has an invalid schema: {}",
                        provider.prefix, provider.version, kind.name, e
                    ))
                })?;
            }
        }
        if provider.created_at.is_none() {
            provider.created_at = Some(OffsetDateTime::now_utc());
        }
        self.storage.save_provider(&provider).await?;
        info!(
            provider = %provider.prefix,
            version = %provider.version,
            kinds = provider.kinds.len(),
            "provider registered"
        );
        Ok(provider)
    }

    pub async fn get_provider(&self, prefix: &str, version: &str) -> Result<Provider, EngineError> {
        Ok(self.storage.get_provider(prefix, version).await?)
    }

    pub async fn list_providers(&self) -> Result<Vec<Provider>, EngineError> {
        Ok(self.storage.list_providers().await?)
    }

    pub async fn unregister_provider(&self, prefix: &str, version: &str) -> Result<(), EngineError> {
        self.storage.delete_provider(prefix, version).await?;
        info!(provider = %prefix, version = %version, "provider unregistered");
        Ok(())
    }

    async fn kind(&self, kind_ref: &KindRef) -> Result<Kind, EngineError> {
        Ok(self.storage.get_kind(kind_ref).await?)
    }

    // ── Entities ──────────────────────────────

    /// Create an entity. A fresh uuid is generated unless one is supplied.
    pub async fn save_entity(
        &self,
        prefix: &str,
        version: &str,
        kind_name: &str,
        spec: Spec,
        uuid: Option<String>,
        user: Option<Value>,
    ) -> Result<EntityUpdate, EngineError> {
        let uuid = uuid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let entity_ref = EntityRef::new(prefix, version, kind_name, uuid);
        let kind = self.kind(&entity_ref.kind_ref()).await?;
        validate_spec(&kind, &spec)?;

        match self.storage.get_entity(&entity_ref).await {
            Ok(_) => return Err(StorageError::EntityExists(entity_ref.key()).into()),
            Err(StorageError::EntityNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        let spec_version = self.storage.highest_spec_version(&entity_ref).await?;
        let metadata = Metadata::new(&entity_ref, spec_version);
        self.intentful
            .strategy_for(&kind)
            .create(&kind, &metadata, &spec, user.as_ref())
            .await
    }

    /// Write a new spec. `metadata.spec_version` must be the stored version.
    pub async fn update_entity_spec(
        &self,
        metadata: &Metadata,
        spec: Spec,
        user: Option<Value>,
    ) -> Result<EntityUpdate, EngineError> {
        let entity_ref = metadata.entity_ref();
        let kind = self.kind(&entity_ref.kind_ref()).await?;
        validate_spec(&kind, &spec)?;
        self.storage.get_entity(&entity_ref).await?;
        self.intentful
            .strategy_for(&kind)
            .update(&kind, metadata, &spec, user.as_ref())
            .await
    }

    pub async fn delete_entity(&self, entity_ref: &EntityRef) -> Result<Entity, EngineError> {
        let kind = self.kind(&entity_ref.kind_ref()).await?;
        let entity = self.intentful.strategy_for(&kind).delete(entity_ref).await?;
        info!(entity = %entity_ref, "entity deleted");
        Ok(entity)
    }

    pub async fn get_entity(&self, entity_ref: &EntityRef) -> Result<Entity, EngineError> {
        Ok(self.storage.get_entity(entity_ref).await?)
    }

    pub async fn list_entities(
        &self,
        filter: &EntityFilter,
        exact_match: bool,
    ) -> Result<Vec<Entity>, EngineError> {
        Ok(self.storage.list_entities(filter, exact_match).await?)
    }

    /// Merge observed state reported by a handler into the stored status.
    pub async fn update_status(
        &self,
        entity_ref: &EntityRef,
        status: &Status,
        expected_hash: Option<&str>,
    ) -> Result<Metadata, EngineError> {
        Ok(self
            .storage
            .update_status(entity_ref, status, expected_hash)
            .await?)
    }

    pub async fn replace_status(
        &self,
        entity_ref: &EntityRef,
        status: &Status,
        expected_hash: Option<&str>,
    ) -> Result<Metadata, EngineError> {
        Ok(self
            .storage
            .replace_status(entity_ref, status, expected_hash)
            .await?)
    }

    // ── Intent watchers ───────────────────────

    /// Full watcher record, diffs included.
    pub async fn get_intent_watcher(&self, uuid: &str) -> Result<IntentWatcher, EngineError> {
        Ok(self.storage.get_watcher(uuid).await?)
    }

    /// Matching watchers without their diffs.
    pub async fn filter_intent_watcher(
        &self,
        filter: &WatcherFilter,
    ) -> Result<Vec<IntentWatcherSummary>, EngineError> {
        let watchers = self.storage.list_watchers(filter).await?;
        Ok(watchers.iter().map(IntentWatcherSummary::from).collect())
    }

    // ── Loops ─────────────────────────────────

    pub fn diff_resolver(
        &self,
        config: &EngineConfig,
        handler: Arc<dyn IntentHandler>,
    ) -> DiffResolver<S> {
        DiffResolver::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.differ),
            handler,
            BackoffPolicy::new(config.max_backoff, config.diff_retry_exponent, config.debug),
            config.entity_batch_size,
            config.diff_resolve_interval(),
        )
    }

    pub fn intent_resolver(&self, config: &EngineConfig) -> IntentResolver<S> {
        IntentResolver::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.differ),
            config.intent_resolve_interval(),
            config.watcher_expiry(),
        )
    }

    /// All loops, with the change listener wired into the intent resolver.
    pub fn reconcilers(
        &self,
        config: &EngineConfig,
        handler: Arc<dyn IntentHandler>,
    ) -> Reconcilers<S> {
        let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);
        Reconcilers {
            diff_resolver: self.diff_resolver(config, handler),
            intent_resolver: self.intent_resolver(config).with_changes(rx),
            change_listener: ChangeListener::new(
                Arc::clone(&self.storage),
                config.entity_poll_interval(),
                tx,
            ),
        }
    }
}

/// Check `spec` against the kind's schema, if it has one.
fn validate_spec(kind: &Kind, spec: &Spec) -> Result<(), EngineError> {
    let Some(schema) = kind.schema() else {
        return Ok(());
    };
    let validator = jsonschema::validator_for(schema).map_err(|e| {
        EngineError::Validation(format!("kind '{}' has an invalid schema: {}", kind.name, e))
    })?;
    let errors: Vec<String> = validator
        .iter_errors(spec)
        .map(|e| format!("{}", e))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "spec does not match kind '{}': {}",
            kind.name,
            errors.join("; ")
        )))
    }
}
