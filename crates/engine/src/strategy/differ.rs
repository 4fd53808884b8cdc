use std::sync::Arc;

use async_trait::async_trait;
use intentful_core::{
    Differ, Entity, EntityRef, IntentWatcher, IntentfulStatus, Kind, Metadata, Spec, Status,
    Watchlist,
};
use intentful_storage::{Storage, StorageError};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info};

use super::{create_with_status, EntityUpdate, IntentfulStrategy};
use crate::error::EngineError;

/// Status converges through intent handlers; the spec write only records
/// the intent.
pub struct DifferStrategy<S> {
    storage: Arc<S>,
    differ: Arc<Differ>,
}

impl<S: Storage> DifferStrategy<S> {
    pub fn new(storage: Arc<S>, differ: Arc<Differ>) -> Self {
        DifferStrategy { storage, differ }
    }

    async fn current_status(&self, entity_ref: &EntityRef) -> Result<Status, EngineError> {
        match self.storage.get_entity(entity_ref).await {
            Ok(entity) => Ok(entity.status),
            Err(StorageError::EntityNotFound(_)) => Ok(Status::Null),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<S: Storage> IntentfulStrategy for DifferStrategy<S> {
    /// A new entity starts satisfied: no watcher and no watchlist entry.
    async fn create(
        &self,
        _kind: &Kind,
        metadata: &Metadata,
        spec: &Spec,
        _user: Option<&Value>,
    ) -> Result<EntityUpdate, EngineError> {
        let created = create_with_status(self.storage.as_ref(), metadata, spec).await?;
        debug!(entity = %metadata.entity_ref(), "entity created with status equal to spec");
        Ok(created)
    }

    async fn update(
        &self,
        kind: &Kind,
        metadata: &Metadata,
        spec: &Spec,
        user: Option<&Value>,
    ) -> Result<EntityUpdate, EngineError> {
        let entity_ref = metadata.entity_ref();
        let status = self.current_status(&entity_ref).await?;
        let mut diffs = self.differ.all_diffs(kind, spec, &status)?;
        // The watcher records the intent only; observed values are unknown
        // at this point.
        for field in diffs.iter_mut().flat_map(|d| d.diff_fields.iter_mut()) {
            field.status = vec![Value::Null];
        }

        let updated = self.storage.update_spec(metadata, spec).await?;

        let intent_watcher = if diffs.is_empty() {
            debug!(entity = %entity_ref, "spec already satisfied, no watcher created");
            None
        } else {
            let watcher = IntentWatcher {
                uuid: uuid::Uuid::new_v4().to_string(),
                entity_ref: entity_ref.clone(),
                spec_version: updated.spec_version,
                user: user.cloned(),
                diffs,
                status: IntentfulStatus::Active,
                resolved_diff_count: 0,
                last_status_changed: None,
                created_at: OffsetDateTime::now_utc(),
            };
            self.storage.save_watcher(&watcher).await?;
            info!(
                entity = %entity_ref,
                watcher = %watcher.uuid,
                diffs = watcher.diffs.len(),
                spec_version = watcher.spec_version,
                "intent watcher created"
            );
            Some(watcher)
        };

        let tracked = entity_ref.clone();
        self.storage
            .edit_watchlist(Box::new(move |wl: &mut Watchlist| {
                wl.touch(tracked);
            }))
            .await?;

        let entity = self.storage.get_entity(&entity_ref).await?;
        Ok(EntityUpdate::from_entity(entity, intent_watcher))
    }

    async fn delete(&self, entity_ref: &EntityRef) -> Result<Entity, EngineError> {
        let entity = self.storage.delete_entity(entity_ref).await?;
        let removed = entity_ref.clone();
        self.storage
            .edit_watchlist(Box::new(move |wl: &mut Watchlist| {
                wl.delete(&removed);
            }))
            .await?;
        Ok(entity)
    }
}
