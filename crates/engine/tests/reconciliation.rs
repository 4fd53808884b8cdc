//! End-to-end reconciliation with an in-process intent handler.
//!
//! Loops are driven step by step (`start_resolving_more_diffs`, `settle`,
//! `tick`) rather than spawned, so every assertion sees a settled state.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{config, provider, RecordingHandler, PREFIX, VERSION};
use intentful_core::{
    Backoff, Delay, Entity, EntityRef, IntentWatcher, IntentfulStatus, Kind, KindRef, Metadata,
    Provider, Spec, Status, Watchlist,
};
use intentful_engine::{ChangeListener, Engine, EntityUpdate, IntentHandler};
use intentful_storage::{
    EntityFilter, EntityStore, MemoryStorage, ProviderStore, StorageError, WatchlistEdit,
    WatchlistStore, WatcherFilter, WatcherStore, WatcherUpdate,
};
use serde_json::{json, Value};
use time::OffsetDateTime;

// ──────────────────────────────────────────────
// Fixtures
// ──────────────────────────────────────────────

async fn setup() -> (Arc<MemoryStorage>, Engine<MemoryStorage>, Arc<RecordingHandler>) {
    let storage = Arc::new(MemoryStorage::new());
    let engine = Engine::new(Arc::clone(&storage));
    engine.register_provider(provider()).await.unwrap();
    let handler = RecordingHandler::new(Arc::clone(&storage));
    (storage, engine, handler)
}

fn vm(uuid: &str) -> EntityRef {
    EntityRef::new(PREFIX, VERSION, "vm", uuid)
}

fn as_handler(handler: &Arc<RecordingHandler>) -> Arc<dyn IntentHandler> {
    Arc::clone(handler) as Arc<dyn IntentHandler>
}

/// Create an empty entity, then ask for `spec`: the entity is left with an
/// active watcher and outstanding diffs.
async fn pending<S: intentful_storage::Storage>(
    engine: &Engine<S>,
    uuid: &str,
    spec: Value,
) -> EntityUpdate {
    let created = engine
        .save_entity(PREFIX, VERSION, "vm", json!({}), Some(uuid.into()), None)
        .await
        .unwrap();
    engine
        .update_entity_spec(&created.metadata, spec, None)
        .await
        .unwrap()
}

// ──────────────────────────────────────────────
// Scenarios
// ──────────────────────────────────────────────

#[tokio::test]
async fn spec_change_converges_and_watcher_completes() {
    let (storage, engine, handler) = setup().await;
    let cfg = config();

    let created = engine
        .save_entity(PREFIX, VERSION, "vm", json!({"cpu": 10}), Some("a".into()), None)
        .await
        .unwrap();
    assert!(created.intent_watcher.is_none());
    assert_eq!(created.status, json!({"cpu": 10}));

    let first = engine
        .update_entity_spec(&created.metadata, json!({"cpu": 15}), None)
        .await
        .unwrap();
    let first_watcher = first.intent_watcher.expect("watcher for first change");

    let updated = engine
        .update_entity_spec(&first.metadata, json!({"cpu": 20}), None)
        .await
        .unwrap();
    let watcher = updated.intent_watcher.expect("watcher for spec change");
    assert_eq!(watcher.status, IntentfulStatus::Active);
    assert_eq!(watcher.spec_version, 3);
    assert_eq!(watcher.diffs.len(), 1);
    assert_eq!(watcher.diffs[0].diff_fields[0].spec, vec![json!(20)]);
    assert_eq!(watcher.diffs[0].diff_fields[0].status, vec![json!(null)]);

    let mut diffs = engine.diff_resolver(&cfg, as_handler(&handler));
    diffs.start_resolving_more_diffs().await.unwrap();
    diffs.settle().await.unwrap();
    assert_eq!(handler.calls(), 1);
    assert_eq!(storage.get_entity(&vm("a")).await.unwrap().status, json!({"cpu": 20}));

    let intents = engine.intent_resolver(&cfg);
    intents.update_active_watchers_statuses().await.unwrap();

    let done = engine.get_intent_watcher(&watcher.uuid).await.unwrap();
    assert_eq!(done.status, IntentfulStatus::CompletedSuccessfully);
    assert!(done.diffs.is_empty());
    assert!(done.last_status_changed.is_some());

    // The spec it was watching was overwritten before anything resolved.
    let stale = engine.get_intent_watcher(&first_watcher.uuid).await.unwrap();
    assert_eq!(stale.status, IntentfulStatus::Outdated);

    // Nothing left to do: the next pass drops the entity from the watchlist.
    diffs.start_resolving_more_diffs().await.unwrap();
    assert_eq!(diffs.in_flight(), 0);
    assert!(!storage.get_watchlist().await.unwrap().has(&vm("a")));
}

#[tokio::test]
async fn watcher_records_target_but_not_observed_status() {
    let (storage, engine, _handler) = setup().await;
    let created = engine
        .save_entity(PREFIX, VERSION, "vm", json!({"cpu": 10}), Some("a2".into()), None)
        .await
        .unwrap();
    storage
        .replace_status(&vm("a2"), &json!({"cpu": 10}), None)
        .await
        .unwrap();

    let updated = engine
        .update_entity_spec(&created.metadata, json!({"cpu": 20}), None)
        .await
        .unwrap();
    let watcher = updated.intent_watcher.expect("watcher for spec change");
    let field = &watcher.diffs[0].diff_fields[0];
    assert_eq!(field.spec, vec![json!(20)]);
    assert_eq!(field.status, vec![Value::Null]);
    assert_eq!(updated.status, json!({"cpu": 10}));
}

#[tokio::test]
async fn multi_signature_change_yields_one_diff_per_signature() {
    let (_storage, engine, _handler) = setup().await;
    let created = pending(&engine, "b", json!({"cpu": 2, "memory": 4096})).await;
    let watcher = created.intent_watcher.unwrap();
    assert_eq!(watcher.diffs.len(), 2);
    let names: Vec<&str> = watcher
        .diffs
        .iter()
        .map(|d| d.intentful_signature.name.as_str())
        .collect();
    assert_eq!(names, vec!["cpu", "memory"]);
    assert_eq!(watcher.diffs[0].diff_fields[0].key, "cpu");
    assert_eq!(watcher.diffs[1].diff_fields[0].key, "memory");
}

#[tokio::test]
async fn diffs_shrink_one_per_pass_until_entity_leaves_watchlist() {
    let (storage, engine, handler) = setup().await;
    let cfg = config();
    let created = pending(&engine, "c", json!({"cpu": 2, "memory": 4096})).await;
    let watcher_uuid = created.intent_watcher.unwrap().uuid;

    let mut diffs = engine.diff_resolver(&cfg, as_handler(&handler));
    let intents = engine.intent_resolver(&cfg);

    diffs.start_resolving_more_diffs().await.unwrap();
    assert_eq!(diffs.in_flight(), 1);
    diffs.settle().await.unwrap();
    assert_eq!(
        storage.get_entity(&vm("c")).await.unwrap().status,
        json!({"cpu": 2})
    );

    intents.update_active_watchers_statuses().await.unwrap();
    let partway = engine.get_intent_watcher(&watcher_uuid).await.unwrap();
    assert_eq!(partway.status, IntentfulStatus::Active);
    assert_eq!(partway.diffs.len(), 1);
    assert_eq!(partway.resolved_diff_count, 1);

    diffs.start_resolving_more_diffs().await.unwrap();
    diffs.settle().await.unwrap();
    intents.update_active_watchers_statuses().await.unwrap();
    let done = engine.get_intent_watcher(&watcher_uuid).await.unwrap();
    assert_eq!(done.status, IntentfulStatus::CompletedSuccessfully);

    diffs.start_resolving_more_diffs().await.unwrap();
    assert!(storage.get_watchlist().await.unwrap().is_empty());
    assert_eq!(handler.calls(), 2);
    assert_eq!(handler.max_per_entity.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn entities_resolve_concurrently_but_one_at_a_time_each() {
    let (_storage, engine, handler) = setup().await;
    let cfg = config();
    for uuid in ["d1", "d2", "d3"] {
        pending(&engine, uuid, json!({"cpu": 1, "memory": 1})).await;
    }
    let mut diffs = engine.diff_resolver(&cfg, as_handler(&handler));
    diffs.start_resolving_more_diffs().await.unwrap();
    assert_eq!(diffs.in_flight(), 3);

    // In-flight entities are skipped by the next pass.
    diffs.start_resolving_more_diffs().await.unwrap();
    assert_eq!(diffs.in_flight(), 3);

    diffs.settle().await.unwrap();
    assert_eq!(handler.calls(), 3);
    assert_eq!(handler.max_per_entity.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_dispatch_records_backoff_and_waits() {
    let (storage, engine, handler) = setup().await;
    handler.failing.store(true, Ordering::SeqCst);
    let cfg = config();
    pending(&engine, "e", json!({"cpu": 3})).await;

    let mut diffs = engine.diff_resolver(&cfg, as_handler(&handler));
    diffs.start_resolving_more_diffs().await.unwrap();
    diffs.settle().await.unwrap();

    let watchlist = storage.get_watchlist().await.unwrap();
    let entry = watchlist.get(&vm("e")).expect("still tracked");
    assert_eq!(entry.diffs.len(), 1);
    let (diff, backoff) = &entry.diffs[0];
    let backoff = backoff.as_ref().expect("backoff recorded");
    assert_eq!(backoff.retries, 0);
    assert!(backoff.delay.delay_seconds >= 1.0);
    assert_eq!(diff.handler_url.as_deref(), Some("http://handler.local/healthcheck"));

    // Delay has not elapsed: no new dispatch, no health check.
    diffs.start_resolving_more_diffs().await.unwrap();
    diffs.settle().await.unwrap();
    assert_eq!(handler.calls(), 1);
    assert_eq!(handler.health_checks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn explicit_handler_delay_wins() {
    let (storage, engine, handler) = setup().await;
    handler.inert.store(true, Ordering::SeqCst);
    *handler.delay_secs.lock().unwrap() = Some(42.0);
    let cfg = config();
    pending(&engine, "f", json!({"cpu": 3})).await;

    let mut diffs = engine.diff_resolver(&cfg, as_handler(&handler));
    diffs.start_resolving_more_diffs().await.unwrap();
    diffs.settle().await.unwrap();

    let watchlist = storage.get_watchlist().await.unwrap();
    let backoff = watchlist.get(&vm("f")).unwrap().diffs[0].1.clone().unwrap();
    assert_eq!(backoff.delay.delay_seconds, 42.0);
    assert_eq!(backoff.retries, 0);
}

#[tokio::test]
async fn retry_waits_for_healthy_handler() {
    let (storage, engine, handler) = setup().await;
    handler.inert.store(true, Ordering::SeqCst);
    let cfg = config();
    let created = pending(&engine, "g", json!({"cpu": 8})).await;

    // Seed an expired backoff for the current diff.
    let kind = storage
        .get_kind(&vm("g").kind_ref())
        .await
        .unwrap();
    let current = engine
        .differ()
        .all_diffs(&kind, &created.spec, &created.status)
        .unwrap();
    let expired = Backoff {
        delay: Delay {
            delay_seconds: 0.5,
            delay_set_time: OffsetDateTime::now_utc() - time::Duration::seconds(5),
        },
        retries: 2,
    };
    let pairs = vec![(current[0].clone(), Some(expired))];
    storage
        .edit_watchlist(Box::new(move |wl: &mut Watchlist| {
            wl.set(vm("g"), pairs);
        }))
        .await
        .unwrap();

    handler.healthy.store(false, Ordering::SeqCst);
    let mut diffs = engine.diff_resolver(&cfg, as_handler(&handler));
    diffs.start_resolving_more_diffs().await.unwrap();
    diffs.settle().await.unwrap();
    assert_eq!(handler.health_checks.load(Ordering::SeqCst), 1);
    assert_eq!(handler.calls(), 0);
    let untouched = storage.get_watchlist().await.unwrap();
    assert_eq!(untouched.get(&vm("g")).unwrap().diffs[0].1.as_ref().unwrap().retries, 2);

    handler.healthy.store(true, Ordering::SeqCst);
    diffs.start_resolving_more_diffs().await.unwrap();
    diffs.settle().await.unwrap();
    assert_eq!(handler.calls(), 1);
    let retried = storage.get_watchlist().await.unwrap();
    assert_eq!(retried.get(&vm("g")).unwrap().diffs[0].1.as_ref().unwrap().retries, 3);
}

#[tokio::test]
async fn deleted_entity_is_dropped_from_watchlist() {
    let (storage, engine, handler) = setup().await;
    pending(&engine, "h", json!({"cpu": 1})).await;
    // Delete behind the engine's back, leaving the watchlist entry behind.
    storage.delete_entity(&vm("h")).await.unwrap();
    assert!(storage.get_watchlist().await.unwrap().has(&vm("h")));

    let mut diffs = engine.diff_resolver(&config(), as_handler(&handler));
    diffs.start_resolving_more_diffs().await.unwrap();
    assert!(!storage.get_watchlist().await.unwrap().has(&vm("h")));
    assert_eq!(handler.calls(), 0);
}

#[tokio::test]
async fn idle_resolver_rediscovers_untracked_entities() {
    let (storage, engine, handler) = setup().await;
    // Written straight to storage, as if left over from before a restart.
    storage
        .update_spec(&Metadata::new(&vm("i"), 0), &json!({"cpu": 4}))
        .await
        .unwrap();
    assert!(storage.get_watchlist().await.unwrap().is_empty());

    let mut diffs = engine.diff_resolver(&config(), as_handler(&handler));
    diffs.tick().await.unwrap();
    assert!(storage.get_watchlist().await.unwrap().has(&vm("i")));

    diffs.tick().await.unwrap();
    diffs.settle().await.unwrap();
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn status_only_fields_never_diff() {
    let (storage, engine, handler) = setup().await;
    let cfg = config();
    pending(&engine, "j", json!({"cpu": 1})).await;
    storage
        .update_status(&vm("j"), &json!({"cpu": 1, "ip": "10.0.0.1"}), None)
        .await
        .unwrap();

    let mut diffs = engine.diff_resolver(&cfg, as_handler(&handler));
    diffs.start_resolving_more_diffs().await.unwrap();
    assert_eq!(diffs.in_flight(), 0);
    assert!(storage.get_watchlist().await.unwrap().is_empty());
}

#[tokio::test]
async fn newer_spec_after_partial_progress_completes_partially() {
    let (_storage, engine, handler) = setup().await;
    let cfg = config();
    let created = pending(&engine, "k", json!({"cpu": 2, "memory": 512})).await;
    let watcher_uuid = created.intent_watcher.unwrap().uuid;

    let mut diffs = engine.diff_resolver(&cfg, as_handler(&handler));
    let intents = engine.intent_resolver(&cfg);
    diffs.start_resolving_more_diffs().await.unwrap();
    diffs.settle().await.unwrap();
    intents.update_active_watchers_statuses().await.unwrap();

    // cpu resolved; now memory's target moves before it is handled.
    let current = engine.get_entity(&vm("k")).await.unwrap();
    engine
        .update_entity_spec(&current.metadata, json!({"cpu": 2, "memory": 1024}), None)
        .await
        .unwrap();
    intents.update_active_watchers_statuses().await.unwrap();

    let watcher = engine.get_intent_watcher(&watcher_uuid).await.unwrap();
    assert_eq!(watcher.status, IntentfulStatus::CompletedPartially);
}

#[tokio::test]
async fn terminal_watchers_expire() {
    let (storage, engine, _handler) = setup().await;
    let old = OffsetDateTime::now_utc() - time::Duration::seconds(10);
    let mut watcher = IntentWatcher {
        uuid: "old".into(),
        entity_ref: vm("z"),
        spec_version: 1,
        user: None,
        diffs: vec![],
        status: IntentfulStatus::Outdated,
        resolved_diff_count: 0,
        last_status_changed: Some(old),
        created_at: old,
    };
    storage.save_watcher(&watcher).await.unwrap();
    watcher.uuid = "live".into();
    watcher.status = IntentfulStatus::Active;
    storage.save_watcher(&watcher).await.unwrap();

    let intents = engine.intent_resolver(&config());
    assert_eq!(intents.clear_terminal_state_watchers().await.unwrap(), 1);
    assert!(storage.get_watcher("old").await.is_err());
    assert!(storage.get_watcher("live").await.is_ok());
}

#[tokio::test]
async fn listener_forwards_changed_entities() {
    let (storage, engine, _handler) = setup().await;
    pending(&engine, "l", json!({"cpu": 1})).await;

    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    let mut listener = ChangeListener::new(Arc::clone(&storage), Duration::from_millis(10), tx);
    assert!(listener.poll().await.unwrap());
    assert!(rx.try_recv().is_err(), "first sight is only recorded");

    storage
        .update_status(&vm("l"), &json!({"cpu": 1}), None)
        .await
        .unwrap();
    assert!(listener.poll().await.unwrap());
    let changed = rx.try_recv().expect("change forwarded");
    assert_eq!(changed.status, json!({"cpu": 1}));

    drop(rx);
    storage
        .update_status(&vm("l"), &json!({"memory": 2}), None)
        .await
        .unwrap();
    assert!(!listener.poll().await.unwrap());
}

#[tokio::test]
async fn spawned_loops_drive_watcher_to_completion() {
    let (_storage, engine, handler) = setup().await;
    let cfg = config();
    let created = pending(&engine, "m", json!({"cpu": 6})).await;
    let watcher_uuid = created.intent_watcher.unwrap().uuid;

    let loops = engine.reconcilers(&cfg, as_handler(&handler));
    let diff_task = tokio::spawn(loops.diff_resolver.run());
    let intent_task = tokio::spawn(loops.intent_resolver.run());
    let listener_task = tokio::spawn(loops.change_listener.run());

    let mut status = IntentfulStatus::Active;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = engine.get_intent_watcher(&watcher_uuid).await.map(|w| w.status).unwrap_or(status);
        if status != IntentfulStatus::Active {
            break;
        }
    }
    diff_task.abort();
    intent_task.abort();
    listener_task.abort();
    assert_eq!(status, IntentfulStatus::CompletedSuccessfully);
}

// ──────────────────────────────────────────────
// Spec writes racing the diff resolver
// ──────────────────────────────────────────────

/// Delegates to a [`MemoryStorage`], but the first watchlist edit after
/// [`RacingStorage::arm`] is preceded by a spec write, as if a client wrote
/// between the resolver's rediff and its commit.
struct RacingStorage {
    inner: Arc<MemoryStorage>,
    queued: Mutex<Option<(Metadata, Spec)>>,
}

impl RacingStorage {
    fn arm(&self, metadata: Metadata, spec: Spec) {
        *self.queued.lock().unwrap() = Some((metadata, spec));
    }
}

#[async_trait]
impl EntityStore for RacingStorage {
    async fn get_entity(&self, entity_ref: &EntityRef) -> Result<Entity, StorageError> {
        self.inner.get_entity(entity_ref).await
    }

    async fn update_spec(
        &self,
        metadata: &Metadata,
        spec: &Spec,
    ) -> Result<Metadata, StorageError> {
        self.inner.update_spec(metadata, spec).await
    }

    async fn update_status(
        &self,
        entity_ref: &EntityRef,
        status: &Status,
        expected_hash: Option<&str>,
    ) -> Result<Metadata, StorageError> {
        self.inner.update_status(entity_ref, status, expected_hash).await
    }

    async fn replace_status(
        &self,
        entity_ref: &EntityRef,
        status: &Status,
        expected_hash: Option<&str>,
    ) -> Result<Metadata, StorageError> {
        self.inner.replace_status(entity_ref, status, expected_hash).await
    }

    async fn list_random_intentful_specs(
        &self,
        batch_size: usize,
        kinds: &[KindRef],
    ) -> Result<Vec<(Metadata, Spec)>, StorageError> {
        self.inner.list_random_intentful_specs(batch_size, kinds).await
    }

    async fn list_entities(
        &self,
        filter: &EntityFilter,
        exact_match: bool,
    ) -> Result<Vec<Entity>, StorageError> {
        self.inner.list_entities(filter, exact_match).await
    }

    async fn delete_entity(&self, entity_ref: &EntityRef) -> Result<Entity, StorageError> {
        self.inner.delete_entity(entity_ref).await
    }

    async fn highest_spec_version(&self, entity_ref: &EntityRef) -> Result<u64, StorageError> {
        self.inner.highest_spec_version(entity_ref).await
    }
}

#[async_trait]
impl WatchlistStore for RacingStorage {
    async fn get_watchlist(&self) -> Result<Watchlist, StorageError> {
        self.inner.get_watchlist().await
    }

    async fn edit_watchlist<'a>(&self, edit: WatchlistEdit<'a>) -> Result<Watchlist, StorageError> {
        let queued = self.queued.lock().unwrap().take();
        if let Some((metadata, spec)) = queued {
            self.inner.update_spec(&metadata, &spec).await?;
            let written = metadata.entity_ref();
            self.inner
                .edit_watchlist(Box::new(move |wl: &mut Watchlist| wl.touch(written)))
                .await?;
        }
        self.inner.edit_watchlist(edit).await
    }
}

#[async_trait]
impl WatcherStore for RacingStorage {
    async fn save_watcher(&self, watcher: &IntentWatcher) -> Result<(), StorageError> {
        self.inner.save_watcher(watcher).await
    }

    async fn get_watcher(&self, uuid: &str) -> Result<IntentWatcher, StorageError> {
        self.inner.get_watcher(uuid).await
    }

    async fn update_watcher(
        &self,
        uuid: &str,
        update: &WatcherUpdate,
    ) -> Result<IntentWatcher, StorageError> {
        self.inner.update_watcher(uuid, update).await
    }

    async fn delete_watcher(&self, uuid: &str) -> Result<(), StorageError> {
        self.inner.delete_watcher(uuid).await
    }

    async fn list_watchers(
        &self,
        filter: &WatcherFilter,
    ) -> Result<Vec<IntentWatcher>, StorageError> {
        self.inner.list_watchers(filter).await
    }
}

#[async_trait]
impl ProviderStore for RacingStorage {
    async fn save_provider(&self, provider: &Provider) -> Result<(), StorageError> {
        self.inner.save_provider(provider).await
    }

    async fn get_provider(&self, prefix: &str, version: &str) -> Result<Provider, StorageError> {
        self.inner.get_provider(prefix, version).await
    }

    async fn list_providers(&self) -> Result<Vec<Provider>, StorageError> {
        self.inner.list_providers().await
    }

    async fn delete_provider(&self, prefix: &str, version: &str) -> Result<(), StorageError> {
        self.inner.delete_provider(prefix, version).await
    }

    async fn get_intentful_kinds(&self) -> Result<Vec<KindRef>, StorageError> {
        self.inner.get_intentful_kinds().await
    }

    async fn get_kind(&self, kind_ref: &KindRef) -> Result<Kind, StorageError> {
        self.inner.get_kind(kind_ref).await
    }
}

#[tokio::test]
async fn spec_written_during_rediff_keeps_entity_tracked() {
    let inner = Arc::new(MemoryStorage::new());
    let storage = Arc::new(RacingStorage {
        inner: Arc::clone(&inner),
        queued: Mutex::new(None),
    });
    let engine = Engine::new(Arc::clone(&storage));
    engine.register_provider(provider()).await.unwrap();
    let handler = RecordingHandler::new(Arc::clone(&inner));

    let updated = pending(&engine, "race", json!({"cpu": 5})).await;
    // Observed state catches up, so a rediff finds nothing to do...
    inner
        .update_status(&vm("race"), &json!({"cpu": 5}), None)
        .await
        .unwrap();
    // ...but a new target lands before the resolver commits.
    storage.arm(updated.metadata.clone(), json!({"cpu": 7}));

    let mut diffs = engine.diff_resolver(&config(), as_handler(&handler));
    diffs.start_resolving_more_diffs().await.unwrap();
    assert_eq!(diffs.in_flight(), 0);
    let watchlist = inner.get_watchlist().await.unwrap();
    assert!(watchlist.has(&vm("race")), "entity dropped despite a new spec");
    assert_eq!(watchlist.revision(&vm("race")), Some(1));

    diffs.start_resolving_more_diffs().await.unwrap();
    diffs.settle().await.unwrap();
    assert_eq!(handler.calls(), 1);
    assert_eq!(
        inner.get_entity(&vm("race")).await.unwrap().status,
        json!({"cpu": 7})
    );
}

#[tokio::test]
async fn spec_written_during_rediff_defers_stale_dispatch() {
    let inner = Arc::new(MemoryStorage::new());
    let storage = Arc::new(RacingStorage {
        inner: Arc::clone(&inner),
        queued: Mutex::new(None),
    });
    let engine = Engine::new(Arc::clone(&storage));
    engine.register_provider(provider()).await.unwrap();
    let handler = RecordingHandler::new(Arc::clone(&inner));

    let updated = pending(&engine, "race2", json!({"cpu": 5})).await;
    storage.arm(updated.metadata.clone(), json!({"cpu": 9}));

    let mut diffs = engine.diff_resolver(&config(), as_handler(&handler));
    diffs.start_resolving_more_diffs().await.unwrap();
    assert_eq!(diffs.in_flight(), 0, "dispatched a diff for an overwritten spec");

    diffs.start_resolving_more_diffs().await.unwrap();
    diffs.settle().await.unwrap();
    assert_eq!(handler.calls(), 1);
    assert_eq!(
        inner.get_entity(&vm("race2")).await.unwrap().status,
        json!({"cpu": 9})
    );
}
