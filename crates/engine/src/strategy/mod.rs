//! Per-kind policy for turning a spec write into stored state.
//!
//! Every kind is created with status equal to its spec. On later writes
//! mirroring kinds copy spec into status on the spot, while differ-based
//! kinds persist the spec, record what still differs in an intent watcher and
//! hand the entity to the diff resolver through the watchlist.

mod differ;
mod mirror;
mod spec_only;

pub use differ::DifferStrategy;
pub use mirror::MirrorStrategy;
pub use spec_only::SpecOnlyStrategy;

use std::sync::Arc;

use async_trait::async_trait;
use intentful_core::{
    Differ, Entity, EntityRef, IntentWatcher, IntentfulBehaviour, Kind, Metadata, Spec, Status,
};
use intentful_storage::Storage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

/// Outcome of a create or update, as returned to API callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub metadata: Metadata,
    pub spec: Spec,
    pub status: Status,
    pub intent_watcher: Option<IntentWatcher>,
}

impl EntityUpdate {
    fn from_entity(entity: Entity, intent_watcher: Option<IntentWatcher>) -> Self {
        EntityUpdate {
            metadata: entity.metadata,
            spec: entity.spec,
            status: entity.status,
            intent_watcher,
        }
    }
}

/// Store a new entity whose status starts out equal to its spec.
async fn create_with_status<S: Storage>(
    storage: &S,
    metadata: &Metadata,
    spec: &Spec,
) -> Result<EntityUpdate, EngineError> {
    let entity_ref = metadata.entity_ref();
    storage.update_spec(metadata, spec).await?;
    storage.replace_status(&entity_ref, spec, None).await?;
    let entity = storage.get_entity(&entity_ref).await?;
    Ok(EntityUpdate::from_entity(entity, None))
}

#[async_trait]
pub trait IntentfulStrategy: Send + Sync {
    /// Store a new entity. `metadata.spec_version` is the highest version
    /// retained for its uuid.
    async fn create(
        &self,
        kind: &Kind,
        metadata: &Metadata,
        spec: &Spec,
        user: Option<&Value>,
    ) -> Result<EntityUpdate, EngineError>;

    /// Write `spec` for the entity named by `metadata`, whose `spec_version`
    /// must match the stored one.
    async fn update(
        &self,
        kind: &Kind,
        metadata: &Metadata,
        spec: &Spec,
        user: Option<&Value>,
    ) -> Result<EntityUpdate, EngineError>;

    async fn delete(&self, entity_ref: &EntityRef) -> Result<Entity, EngineError>;
}

/// Holds one strategy per behaviour and picks by kind.
pub struct IntentfulContext<S: Storage> {
    mirror: MirrorStrategy<S>,
    spec_only: SpecOnlyStrategy<S>,
    differ: DifferStrategy<S>,
}

impl<S: Storage> IntentfulContext<S> {
    pub fn new(storage: Arc<S>, differ: Arc<Differ>) -> Self {
        IntentfulContext {
            mirror: MirrorStrategy::new(Arc::clone(&storage)),
            spec_only: SpecOnlyStrategy::new(Arc::clone(&storage)),
            differ: DifferStrategy::new(storage, differ),
        }
    }

    pub fn strategy_for(&self, kind: &Kind) -> &dyn IntentfulStrategy {
        match kind.intentful_behaviour {
            IntentfulBehaviour::ImmediateMirror => &self.mirror,
            IntentfulBehaviour::SpecOnly => &self.spec_only,
            IntentfulBehaviour::DifferBased => &self.differ,
        }
    }
}
