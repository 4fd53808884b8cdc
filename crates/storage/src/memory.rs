//! In-process storage backend. Used by the CLI `serve` command and by tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use intentful_core::{
    merge_patch, status_hash, Entity, EntityRef, IntentWatcher, IntentfulBehaviour, KindRef,
    Metadata, Provider, ProviderRef, Spec, Status, Watchlist,
};
use rand::seq::SliceRandom;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{EntityFilter, WatcherFilter, WatcherUpdate};
use crate::traits::{EntityStore, ProviderStore, WatchlistEdit, WatchlistStore, WatcherStore};

#[derive(Default)]
struct Tables {
    entities: HashMap<String, Entity>,
    /// Deleted entities by reference key, most recent last.
    graveyard: HashMap<String, Vec<Entity>>,
    watchers: BTreeMap<String, IntentWatcher>,
    providers: BTreeMap<ProviderRef, Provider>,
}

/// All state held in memory behind mutexes.
///
/// Entity, watcher and provider tables share one lock that is never held
/// across an await. The watchlist has its own async lock so edits serialize.
#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
    watchlist: tokio::sync::Mutex<Watchlist>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Tables {
    fn retained_version(&self, key: &str) -> u64 {
        self.graveyard
            .get(key)
            .and_then(|dead| dead.iter().map(|e| e.metadata.spec_version).max())
            .unwrap_or(0)
    }

    fn write_status(
        &mut self,
        entity_ref: &EntityRef,
        expected_hash: Option<&str>,
        write: impl FnOnce(&mut Status),
    ) -> Result<Metadata, StorageError> {
        let key = entity_ref.key();
        let entity = self
            .entities
            .get_mut(&key)
            .ok_or_else(|| StorageError::EntityNotFound(key.clone()))?;
        let current = entity
            .metadata
            .status_hash
            .clone()
            .unwrap_or_else(|| status_hash(&entity.status));
        if let Some(expected) = expected_hash {
            if expected != current {
                return Err(StorageError::StatusHashConflict {
                    entity: key,
                    expected: expected.to_owned(),
                    current,
                });
            }
        }
        write(&mut entity.status);
        entity.metadata.status_hash = Some(status_hash(&entity.status));
        Ok(entity.metadata.clone())
    }
}

#[async_trait]
impl EntityStore for MemoryStorage {
    async fn get_entity(&self, entity_ref: &EntityRef) -> Result<Entity, StorageError> {
        let key = entity_ref.key();
        self.tables()
            .entities
            .get(&key)
            .cloned()
            .ok_or(StorageError::EntityNotFound(key))
    }

    async fn update_spec(
        &self,
        metadata: &Metadata,
        spec: &Spec,
    ) -> Result<Metadata, StorageError> {
        let entity_ref = metadata.entity_ref();
        let key = entity_ref.key();
        let mut tables = self.tables();
        let current = match tables.entities.get(&key) {
            Some(e) => e.metadata.spec_version,
            None => tables.retained_version(&key),
        };
        if metadata.spec_version != current {
            return Err(StorageError::SpecVersionConflict {
                entity: key,
                expected: metadata.spec_version,
                current,
            });
        }
        let entity = tables.entities.entry(key).or_insert_with(|| {
            let mut fresh = Metadata::new(&entity_ref, current);
            fresh.created_at = Some(OffsetDateTime::now_utc());
            fresh.extension = metadata.extension.clone();
            fresh.status_hash = Some(status_hash(&Status::Null));
            Entity {
                metadata: fresh,
                spec: Spec::Null,
                status: Status::Null,
            }
        });
        entity.metadata.spec_version = current + 1;
        entity.spec = spec.clone();
        Ok(entity.metadata.clone())
    }

    async fn update_status(
        &self,
        entity_ref: &EntityRef,
        status: &Status,
        expected_hash: Option<&str>,
    ) -> Result<Metadata, StorageError> {
        self.tables()
            .write_status(entity_ref, expected_hash, |s| merge_patch(s, status))
    }

    async fn replace_status(
        &self,
        entity_ref: &EntityRef,
        status: &Status,
        expected_hash: Option<&str>,
    ) -> Result<Metadata, StorageError> {
        self.tables()
            .write_status(entity_ref, expected_hash, |s| *s = status.clone())
    }

    async fn list_random_intentful_specs(
        &self,
        batch_size: usize,
        kinds: &[KindRef],
    ) -> Result<Vec<(Metadata, Spec)>, StorageError> {
        let mut picked: Vec<(Metadata, Spec)> = self
            .tables()
            .entities
            .values()
            .filter(|e| kinds.contains(&e.metadata.entity_ref().kind_ref()))
            .map(|e| (e.metadata.clone(), e.spec.clone()))
            .collect();
        picked.shuffle(&mut rand::thread_rng());
        picked.truncate(batch_size);
        Ok(picked)
    }

    async fn list_entities(
        &self,
        filter: &EntityFilter,
        exact_match: bool,
    ) -> Result<Vec<Entity>, StorageError> {
        let mut found: Vec<Entity> = self
            .tables()
            .entities
            .values()
            .filter(|e| filter.matches(&e.metadata, &e.spec, &e.status, exact_match))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.metadata.uuid.cmp(&b.metadata.uuid));
        Ok(found)
    }

    async fn delete_entity(&self, entity_ref: &EntityRef) -> Result<Entity, StorageError> {
        let key = entity_ref.key();
        let mut tables = self.tables();
        let mut entity = tables
            .entities
            .remove(&key)
            .ok_or_else(|| StorageError::EntityNotFound(key.clone()))?;
        entity.metadata.deleted_at = Some(OffsetDateTime::now_utc());
        tables.graveyard.entry(key).or_default().push(entity.clone());
        Ok(entity)
    }

    async fn highest_spec_version(&self, entity_ref: &EntityRef) -> Result<u64, StorageError> {
        let key = entity_ref.key();
        let tables = self.tables();
        let live = tables
            .entities
            .get(&key)
            .map(|e| e.metadata.spec_version)
            .unwrap_or(0);
        Ok(live.max(tables.retained_version(&key)))
    }
}

#[async_trait]
impl WatchlistStore for MemoryStorage {
    async fn get_watchlist(&self) -> Result<Watchlist, StorageError> {
        Ok(self.watchlist.lock().await.clone())
    }

    async fn edit_watchlist<'a>(&self, edit: WatchlistEdit<'a>) -> Result<Watchlist, StorageError> {
        let mut current = self.watchlist.lock().await;
        edit(&mut current);
        current.version += 1;
        Ok(current.clone())
    }
}

#[async_trait]
impl WatcherStore for MemoryStorage {
    async fn save_watcher(&self, watcher: &IntentWatcher) -> Result<(), StorageError> {
        self.tables()
            .watchers
            .insert(watcher.uuid.clone(), watcher.clone());
        Ok(())
    }

    async fn get_watcher(&self, uuid: &str) -> Result<IntentWatcher, StorageError> {
        self.tables()
            .watchers
            .get(uuid)
            .cloned()
            .ok_or_else(|| StorageError::WatcherNotFound(uuid.to_owned()))
    }

    async fn update_watcher(
        &self,
        uuid: &str,
        update: &WatcherUpdate,
    ) -> Result<IntentWatcher, StorageError> {
        let mut tables = self.tables();
        let watcher = tables
            .watchers
            .get_mut(uuid)
            .ok_or_else(|| StorageError::WatcherNotFound(uuid.to_owned()))?;
        update.apply(watcher);
        Ok(watcher.clone())
    }

    async fn delete_watcher(&self, uuid: &str) -> Result<(), StorageError> {
        self.tables()
            .watchers
            .remove(uuid)
            .map(|_| ())
            .ok_or_else(|| StorageError::WatcherNotFound(uuid.to_owned()))
    }

    async fn list_watchers(
        &self,
        filter: &WatcherFilter,
    ) -> Result<Vec<IntentWatcher>, StorageError> {
        let mut found: Vec<IntentWatcher> = self
            .tables()
            .watchers
            .values()
            .filter(|w| filter.matches(w))
            .cloned()
            .collect();
        found.sort_by_key(|w| w.created_at);
        Ok(found)
    }
}

#[async_trait]
impl ProviderStore for MemoryStorage {
    async fn save_provider(&self, provider: &Provider) -> Result<(), StorageError> {
        let mut stored = provider.clone();
        stored.created_at.get_or_insert_with(OffsetDateTime::now_utc);
        self.tables()
            .providers
            .insert(provider.provider_ref(), stored);
        Ok(())
    }

    async fn get_provider(&self, prefix: &str, version: &str) -> Result<Provider, StorageError> {
        let key = ProviderRef {
            provider_prefix: prefix.to_owned(),
            provider_version: version.to_owned(),
        };
        self.tables()
            .providers
            .get(&key)
            .cloned()
            .ok_or_else(|| StorageError::ProviderNotFound {
                prefix: prefix.to_owned(),
                version: version.to_owned(),
            })
    }

    async fn list_providers(&self) -> Result<Vec<Provider>, StorageError> {
        Ok(self.tables().providers.values().cloned().collect())
    }

    async fn delete_provider(&self, prefix: &str, version: &str) -> Result<(), StorageError> {
        let key = ProviderRef {
            provider_prefix: prefix.to_owned(),
            provider_version: version.to_owned(),
        };
        self.tables()
            .providers
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| StorageError::ProviderNotFound {
                prefix: prefix.to_owned(),
                version: version.to_owned(),
            })
    }

    async fn get_intentful_kinds(&self) -> Result<Vec<KindRef>, StorageError> {
        Ok(self
            .tables()
            .providers
            .values()
            .flat_map(|p| {
                p.kinds
                    .iter()
                    .filter(|k| k.intentful_behaviour == IntentfulBehaviour::DifferBased)
                    .map(move |k| p.kind_ref(k))
            })
            .collect())
    }
}
