use std::sync::Arc;

use async_trait::async_trait;
use intentful_core::{Entity, EntityRef, Kind, Metadata, Spec};
use intentful_storage::Storage;
use serde_json::Value;

use super::{create_with_status, EntityUpdate, IntentfulStrategy};
use crate::error::EngineError;

/// Status is overwritten with the spec on every write.
pub struct SpecOnlyStrategy<S> {
    storage: Arc<S>,
}

impl<S: Storage> SpecOnlyStrategy<S> {
    pub fn new(storage: Arc<S>) -> Self {
        SpecOnlyStrategy { storage }
    }
}

#[async_trait]
impl<S: Storage> IntentfulStrategy for SpecOnlyStrategy<S> {
    async fn create(
        &self,
        _kind: &Kind,
        metadata: &Metadata,
        spec: &Spec,
        _user: Option<&Value>,
    ) -> Result<EntityUpdate, EngineError> {
        create_with_status(self.storage.as_ref(), metadata, spec).await
    }

    async fn update(
        &self,
        _kind: &Kind,
        metadata: &Metadata,
        spec: &Spec,
        _user: Option<&Value>,
    ) -> Result<EntityUpdate, EngineError> {
        let entity_ref = metadata.entity_ref();
        self.storage.update_spec(metadata, spec).await?;
        self.storage.replace_status(&entity_ref, spec, None).await?;
        let entity = self.storage.get_entity(&entity_ref).await?;
        Ok(EntityUpdate::from_entity(entity, None))
    }

    async fn delete(&self, entity_ref: &EntityRef) -> Result<Entity, EngineError> {
        Ok(self.storage.delete_entity(entity_ref).await?)
    }
}
