//! Advances intent watchers by comparing what they recorded with the
//! entity's current diffs.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use intentful_core::{
    get_diff_path_value, Diff, DiffField, Differ, Entity, EntityRef, IntentWatcher,
    IntentfulStatus, PathSegment,
};
use serde_json::Value;
use intentful_storage::{Storage, WatcherFilter, WatcherUpdate};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::EngineError;

pub struct IntentResolver<S: Storage> {
    storage: Arc<S>,
    differ: Arc<Differ>,
    delay: Duration,
    watcher_expiry: Duration,
    changes: Option<mpsc::Receiver<Entity>>,
}

enum Wake {
    Tick,
    Change(Option<Entity>),
}

async fn next_change(changes: &mut Option<mpsc::Receiver<Entity>>) -> Option<Entity> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl<S: Storage> IntentResolver<S> {
    pub fn new(
        storage: Arc<S>,
        differ: Arc<Differ>,
        delay: Duration,
        watcher_expiry: Duration,
    ) -> Self {
        IntentResolver {
            storage,
            differ,
            delay,
            watcher_expiry,
            changes: None,
        }
    }

    /// Also react to entities forwarded by a change listener.
    pub fn with_changes(mut self, changes: mpsc::Receiver<Entity>) -> Self {
        self.changes = Some(changes);
        self
    }

    /// Run forever. Returns only on a loop-fatal error.
    pub async fn run(mut self) -> Result<(), EngineError> {
        info!(delay_ms = self.delay.as_millis() as u64, "intent resolver started");
        let mut changes = self.changes.take();
        // `interval_at` rejects a zero period.
        let period = self.delay.max(Duration::from_millis(1));
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let wake = tokio::select! {
                _ = ticker.tick() => Wake::Tick,
                change = next_change(&mut changes) => Wake::Change(change),
            };
            match wake {
                Wake::Tick => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "intent resolver stopped");
                        return Err(e);
                    }
                }
                Wake::Change(Some(entity)) => self.on_change(&entity).await,
                Wake::Change(None) => {
                    debug!("change listener gone, relying on periodic passes");
                    changes = None;
                }
            }
        }
    }

    /// One periodic pass: expire old terminal watchers, then re-evaluate
    /// every watched entity.
    pub async fn tick(&self) -> Result<(), EngineError> {
        self.clear_terminal_state_watchers().await?;
        self.update_active_watchers_statuses().await
    }

    /// Delete terminal watchers whose last status change is older than the
    /// expiry window. Returns how many were deleted.
    pub async fn clear_terminal_state_watchers(&self) -> Result<usize, EngineError> {
        let now = OffsetDateTime::now_utc();
        let expiry = self.watcher_expiry.as_secs_f64();
        let mut deleted = 0;
        for watcher in self.storage.list_watchers(&WatcherFilter::default()).await? {
            if !watcher.status.is_terminal() {
                continue;
            }
            let Some(changed) = watcher.last_status_changed else {
                continue;
            };
            if (now - changed).as_seconds_f64() > expiry {
                self.storage.delete_watcher(&watcher.uuid).await?;
                info!(watcher = %watcher.uuid, entity = %watcher.entity_ref, "intent watcher expired");
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Re-evaluate every entity that is on the watchlist or has an active
    /// watcher, regardless of whether a change was observed.
    pub async fn update_active_watchers_statuses(&self) -> Result<(), EngineError> {
        let mut refs: BTreeSet<EntityRef> =
            self.storage.get_watchlist().await?.entity_refs().into_iter().collect();
        let active = WatcherFilter {
            status: Some(IntentfulStatus::Active),
            ..Default::default()
        };
        for watcher in self.storage.list_watchers(&active).await? {
            refs.insert(watcher.entity_ref);
        }

        for entity_ref in refs {
            match self.storage.get_entity(&entity_ref).await {
                Ok(entity) => self.on_change(&entity).await,
                Err(e) => {
                    debug!(entity = %entity_ref, error = %e, "could not load entity for watcher update");
                }
            }
        }
        Ok(())
    }

    /// Process every active watcher of `entity`. Errors are logged, not returned.
    pub async fn on_change(&self, entity: &Entity) {
        let entity_ref = entity.metadata.entity_ref();
        let watchers = match self
            .storage
            .list_watchers(&WatcherFilter::active_for(&entity_ref))
            .await
        {
            Ok(watchers) => watchers,
            Err(e) => {
                debug!(entity = %entity_ref, error = %e, "could not list watchers");
                return;
            }
        };
        for watcher in watchers {
            if let Err(e) = self.process_active_watcher(&watcher, entity).await {
                debug!(entity = %entity_ref, watcher = %watcher.uuid, error = %e, "could not process watcher");
            }
        }
    }

    /// Classify `watcher` against the live entity and persist the outcome.
    pub async fn process_active_watcher(
        &self,
        watcher: &IntentWatcher,
        entity: &Entity,
    ) -> Result<IntentfulStatus, EngineError> {
        let kind = self
            .storage
            .get_kind(&entity.metadata.entity_ref().kind_ref())
            .await?;
        let current = self
            .differ
            .all_diffs(&kind, &entity.spec, &entity.status)?;
        let outcome = classify(watcher, entity, &current);
        let status = determine_watcher_status(
            outcome.affected,
            outcome.resolved,
            watcher.diffs.len(),
            watcher.resolved_diff_count,
        );

        let changed = status != watcher.status;
        let update = WatcherUpdate {
            status: Some(status),
            diffs: Some(outcome.unresolved),
            resolved_diff_count: Some(watcher.resolved_diff_count + outcome.resolved),
            last_status_changed: changed.then(OffsetDateTime::now_utc),
        };
        self.storage.update_watcher(&watcher.uuid, &update).await?;
        if changed {
            info!(
                watcher = %watcher.uuid,
                entity = %watcher.entity_ref,
                from = ?watcher.status,
                to = ?status,
                "intent watcher status changed"
            );
        }
        Ok(status)
    }
}

/// Per-pass tally of a watcher's recorded diffs.
#[derive(Debug, Default, PartialEq)]
pub struct Classification {
    pub affected: usize,
    pub resolved: usize,
    pub unresolved: Vec<Diff>,
}

/// Split the watcher's diffs into affected, resolved and still unresolved.
///
/// Fields only count as affected when a newer spec version was written
/// since the watcher was created.
pub fn classify(watcher: &IntentWatcher, entity: &Entity, current: &[Diff]) -> Classification {
    let newer_spec = entity.metadata.spec_version > watcher.spec_version;
    let mut out = Classification::default();
    for recorded in &watcher.diffs {
        let existing = get_existing(current, recorded);
        if newer_spec && !path_values_equal(&recorded.diff_fields, entity) {
            out.affected += 1;
        } else if let Some(diff) = existing {
            out.unresolved.push(diff.clone());
        } else {
            out.resolved += 1;
        }
    }
    out
}

/// A current diff with a field at the same position and path as one of
/// `recorded`'s fields.
pub fn get_existing<'a>(current: &'a [Diff], recorded: &Diff) -> Option<&'a Diff> {
    current.iter().find(|diff| {
        recorded
            .diff_fields
            .iter()
            .enumerate()
            .any(|(i, field)| diff.diff_fields.get(i).map(|f| &f.path) == Some(&field.path))
    })
}

/// True when every field's path still holds the value the watcher recorded.
/// A path that no longer resolves counts as changed.
///
/// Removal fields point at the whole array, so they are unchanged for as long
/// as spec still lacks an element with the removed key.
pub fn path_values_equal(fields: &[DiffField], entity: &Entity) -> bool {
    fields.iter().all(|field| {
        if let Some(removed) = removed_key(field) {
            return match get_diff_path_value(field, &entity.spec) {
                Ok(Value::Array(items)) => !items
                    .iter()
                    .any(|item| item.get(field.key.as_str()) == Some(removed)),
                Ok(Value::Null) | Err(_) => true,
                Ok(_) => false,
            };
        }
        match (get_diff_path_value(field, &entity.spec), field.spec.first()) {
            (Ok(live), Some(recorded)) => live == recorded,
            _ => false,
        }
    })
}

/// Key value of the element a removal field asks to drop: the field targets
/// null at the array itself rather than at one of its elements.
fn removed_key(field: &DiffField) -> Option<&Value> {
    if field.spec.first() != Some(&Value::Null)
        || matches!(field.path.last(), Some(PathSegment::Index(_)))
    {
        return None;
    }
    field.keys.get(&field.key)
}

/// Watcher status after a pass.
///
/// `resolved_before` counts diffs resolved by earlier passes, so a watcher
/// that made progress before a newer spec intervened finishes partially
/// rather than outdated.
pub fn determine_watcher_status(
    affected: usize,
    resolved: usize,
    total: usize,
    resolved_before: usize,
) -> IntentfulStatus {
    if affected > 0 {
        if resolved + resolved_before > 0 {
            return IntentfulStatus::CompletedPartially;
        }
        if affected == total {
            return IntentfulStatus::Outdated;
        }
    } else if resolved == total {
        return IntentfulStatus::CompletedSuccessfully;
    }
    IntentfulStatus::Active
}
