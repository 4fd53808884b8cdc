//! The reconciliation loop: drains the watchlist by dispatching intent
//! handlers, one diff per entity at a time.
//!
//! Each pass recomputes the diffs of every tracked entity that has no
//! resolution in flight, reconciles them with the stored `(Diff, Backoff)`
//! pairs, and spawns at most one resolution task per entity. The loop then
//! waits for any single task to finish before the next pass, or pulls a random
//! batch of differ-based entities into the watchlist when nothing is running.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use intentful_core::{
    Backoff, Delay, Diff, DiffPair, Differ, Entity, EntityRef, Kind, Watchlist,
};
use intentful_storage::Storage;
use time::OffsetDateTime;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::EngineError;
use crate::handler::{HandlerRequest, IntentHandler};
use crate::selection::select_one;

/// Everything a resolution task needs, shared between the loop and its tasks.
struct Shared<S> {
    storage: Arc<S>,
    differ: Arc<Differ>,
    handler: Arc<dyn IntentHandler>,
    backoff: BackoffPolicy,
}

/// Freshly recomputed state of one tracked entity.
struct Rediff {
    entity: Entity,
    kind: Kind,
    diffs: Vec<Diff>,
}

/// One diff selected for dispatch.
struct Job {
    entity_ref: EntityRef,
    /// Watchlist revision the job was computed from.
    revision: u64,
    entity: Entity,
    kind: Kind,
    diff: Diff,
    backoff: Option<Backoff>,
}

pub struct DiffResolver<S: Storage> {
    shared: Arc<Shared<S>>,
    batch_size: usize,
    delay: Duration,
    tasks: JoinSet<(String, Result<(), EngineError>)>,
    in_flight: HashSet<String>,
}

impl<S: Storage> DiffResolver<S> {
    pub fn new(
        storage: Arc<S>,
        differ: Arc<Differ>,
        handler: Arc<dyn IntentHandler>,
        backoff: BackoffPolicy,
        batch_size: usize,
        delay: Duration,
    ) -> Self {
        DiffResolver {
            shared: Arc::new(Shared {
                storage,
                differ,
                handler,
                backoff,
            }),
            batch_size,
            delay,
            tasks: JoinSet::new(),
            in_flight: HashSet::new(),
        }
    }

    /// Run forever. Returns only on a loop-fatal error.
    pub async fn run(mut self) -> Result<(), EngineError> {
        info!(delay_ms = self.delay.as_millis() as u64, "diff resolver started");
        loop {
            tokio::time::sleep(self.delay).await;
            if let Err(e) = self.tick().await {
                error!(error = %e, "diff resolver stopped");
                return Err(e);
            }
        }
    }

    /// One loop iteration without the leading sleep.
    pub async fn tick(&mut self) -> Result<(), EngineError> {
        self.start_resolving_more_diffs().await?;
        if self.tasks.is_empty() {
            self.add_random_entities().await
        } else {
            self.wait_for_any().await
        }
    }

    /// Number of entities with a resolution task running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Rediff every idle watchlist entry and dispatch one diff per entity.
    pub async fn start_resolving_more_diffs(&mut self) -> Result<(), EngineError> {
        let watchlist = self.shared.storage.get_watchlist().await?;
        let now = OffsetDateTime::now_utc();
        let mut outcomes: Vec<(EntityRef, u64, Vec<DiffPair>)> = Vec::new();
        let mut jobs = Vec::new();

        for entry in watchlist.entries() {
            let key = entry.entity_ref.key();
            if self.in_flight.contains(&key) {
                continue;
            }
            let rediff = match self.shared.rediff(&entry.entity_ref).await {
                Ok(rediff) => rediff,
                Err(e) => {
                    debug!(entity = %key, error = %e, "could not rediff entity, removing from watchlist");
                    outcomes.push((entry.entity_ref.clone(), entry.revision, Vec::new()));
                    continue;
                }
            };
            let Rediff {
                entity,
                kind,
                diffs,
            } = rediff;
            let pairs = reconcile(&entry.diffs, diffs);
            if pairs.is_empty() {
                debug!(entity = %key, "no outstanding diffs, removing from watchlist");
            } else if let Some(idx) = select_one(kind.diff_selection_strategy, &pairs, now) {
                let (diff, backoff) = pairs[idx].clone();
                jobs.push(Job {
                    revision: entry.revision,
                    entity_ref: entry.entity_ref.clone(),
                    entity,
                    kind,
                    diff,
                    backoff,
                });
            }
            outcomes.push((entry.entity_ref.clone(), entry.revision, pairs));
        }

        if outcomes.is_empty() {
            return Ok(());
        }
        // A spec written since the snapshot bumps the entry's revision; such
        // entries are left for the next pass.
        let committed = self
            .shared
            .storage
            .edit_watchlist(Box::new(move |wl: &mut Watchlist| {
                for (entity_ref, revision, pairs) in outcomes {
                    if wl.revision(&entity_ref) != Some(revision) {
                        continue;
                    }
                    if pairs.is_empty() {
                        wl.delete(&entity_ref);
                    } else {
                        wl.set(entity_ref, pairs);
                    }
                }
            }))
            .await?;

        for job in jobs {
            if committed.revision(&job.entity_ref) != Some(job.revision) {
                debug!(entity = %job.entity_ref, "spec changed during rediff, dispatch deferred");
                continue;
            }
            let key = job.entity_ref.key();
            let shared = Arc::clone(&self.shared);
            self.in_flight.insert(key.clone());
            self.tasks.spawn(async move {
                let result = shared.resolve(job).await;
                (key, result)
            });
        }
        Ok(())
    }

    /// Wait until one in-flight resolution finishes.
    async fn wait_for_any(&mut self) -> Result<(), EngineError> {
        match self.tasks.join_next().await {
            Some(Ok((key, result))) => {
                self.in_flight.remove(&key);
                result
            }
            Some(Err(e)) => Err(EngineError::Task(e.to_string())),
            None => Ok(()),
        }
    }

    /// Wait for every in-flight resolution to finish.
    pub async fn settle(&mut self) -> Result<(), EngineError> {
        while !self.tasks.is_empty() {
            self.wait_for_any().await?;
        }
        Ok(())
    }

    /// Track a random batch of differ-based entities not yet in the watchlist.
    pub async fn add_random_entities(&self) -> Result<(), EngineError> {
        let storage = &self.shared.storage;
        let kinds = storage.get_intentful_kinds().await?;
        if kinds.is_empty() {
            return Ok(());
        }
        let batch = storage
            .list_random_intentful_specs(self.batch_size, &kinds)
            .await?;
        if batch.is_empty() {
            return Ok(());
        }
        let refs: Vec<EntityRef> = batch.iter().map(|(meta, _)| meta.entity_ref()).collect();
        let mut added = 0usize;
        let added_ref = &mut added;
        storage
            .edit_watchlist(Box::new(move |wl: &mut Watchlist| {
                for entity_ref in refs {
                    if wl.track(entity_ref) {
                        *added_ref += 1;
                    }
                }
            }))
            .await?;
        if added > 0 {
            debug!(added, "rediscovered entities added to watchlist");
        }
        Ok(())
    }
}

impl<S: Storage> Shared<S> {
    async fn rediff(&self, entity_ref: &EntityRef) -> Result<Rediff, EngineError> {
        let entity = self.storage.get_entity(entity_ref).await?;
        let kind = self.storage.get_kind(&entity_ref.kind_ref()).await?;
        let diffs = self.differ.all_diffs(&kind, &entity.spec, &entity.status)?;
        Ok(Rediff {
            entity,
            kind,
            diffs,
        })
    }

    /// Start or retry resolution of one diff and record its new backoff.
    async fn resolve(&self, job: Job) -> Result<(), EngineError> {
        let key = job.entity_ref.key();
        let signature = &job.diff.intentful_signature;

        let next = match &job.backoff {
            None => {
                info!(entity = %key, kind = %job.kind.name, signature = %signature.name, "starting to resolve diff");
                let explicit = self.dispatch(&job).await;
                self.backoff.backoff(&job.kind, explicit, 0)
            }
            Some(previous) => {
                let health_url = job
                    .diff
                    .handler_url
                    .clone()
                    .unwrap_or_else(|| signature.healthcheck_url());
                if !self.handler.healthy(&health_url).await {
                    debug!(entity = %key, url = %health_url, "handler unhealthy, skipping retry");
                    return Ok(());
                }
                info!(entity = %key, kind = %job.kind.name, retries = previous.retries + 1, "retrying diff");
                let explicit = self.dispatch(&job).await;
                self.backoff.next(previous, &job.kind, explicit)
            }
        };
        debug!(entity = %key, retries = next.retries, delay_secs = next.delay.delay_seconds, "diff backoff recorded");

        let handler_url = signature.healthcheck_url();
        let Job {
            entity_ref, diff, ..
        } = job;
        self.storage
            .edit_watchlist(Box::new(move |wl: &mut Watchlist| {
                let Some(entry) = wl.get_mut(&entity_ref) else {
                    return;
                };
                if let Some(pair) = entry.diffs.iter_mut().find(|(d, _)| d.same_as(&diff)) {
                    if pair.0.handler_url.is_none() {
                        pair.0.handler_url = Some(handler_url);
                    }
                    pair.1 = Some(next);
                }
            }))
            .await?;
        Ok(())
    }

    /// Invoke the diff's handler. Failures are logged and yield no explicit delay.
    async fn dispatch(&self, job: &Job) -> Option<Delay> {
        let request = HandlerRequest {
            metadata: job.entity.metadata.clone(),
            spec: job.entity.spec.clone(),
            status: job.entity.status.clone(),
            input: job.diff.diff_fields.clone(),
        };
        let url = &job.diff.intentful_signature.procedure_callback;
        match self.handler.invoke(url, &request).await {
            Ok(delay) => delay.map(Delay::starting_now),
            Err(e) => {
                warn!(entity = %job.entity_ref, error = %e, "could not invoke intent handler");
                None
            }
        }
    }
}

/// Merge freshly computed diffs into the stored pairs.
///
/// Stored pairs whose diff is gone are dropped; surviving pairs keep their
/// backoff; new diffs are appended without one.
pub fn reconcile(stored: &[DiffPair], current: Vec<Diff>) -> Vec<DiffPair> {
    let mut pairs: Vec<DiffPair> = stored
        .iter()
        .filter(|(diff, _)| current.iter().any(|c| c.same_as(diff)))
        .cloned()
        .collect();
    for diff in current {
        if !pairs.iter().any(|(d, _)| d.same_as(&diff)) {
            pairs.push((diff, None));
        }
    }
    pairs
}
