//! Polling change listener feeding the intent resolver.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use intentful_core::{Entity, Spec, Status};
use intentful_storage::Storage;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::EngineError;

/// Remembers the last observed spec and status of every watchlist entity and
/// forwards entities whose documents changed.
pub struct ChangeListener<S: Storage> {
    storage: Arc<S>,
    delay: Duration,
    seen: HashMap<String, (Spec, Status)>,
    tx: mpsc::Sender<Entity>,
}

impl<S: Storage> ChangeListener<S> {
    pub fn new(storage: Arc<S>, delay: Duration, tx: mpsc::Sender<Entity>) -> Self {
        ChangeListener {
            storage,
            delay,
            seen: HashMap::new(),
            tx,
        }
    }

    /// Poll until the receiving side goes away.
    pub async fn run(mut self) -> Result<(), EngineError> {
        info!(delay_ms = self.delay.as_millis() as u64, "change listener started");
        loop {
            tokio::time::sleep(self.delay).await;
            if !self.poll().await? {
                debug!("change receiver closed, listener exiting");
                return Ok(());
            }
        }
    }

    /// One poll. Returns `false` once nobody is listening.
    pub async fn poll(&mut self) -> Result<bool, EngineError> {
        let watchlist = self.storage.get_watchlist().await?;
        let mut live = HashSet::new();

        for entity_ref in watchlist.entity_refs() {
            let Ok(entity) = self.storage.get_entity(&entity_ref).await else {
                continue;
            };
            let key = entity_ref.key();
            live.insert(key.clone());
            let snapshot = (entity.spec.clone(), entity.status.clone());
            let previous = self.seen.insert(key, snapshot.clone());
            match previous {
                Some(prev) if prev != snapshot => {
                    if self.tx.send(entity).await.is_err() {
                        return Ok(false);
                    }
                }
                _ => {}
            }
        }

        self.seen.retain(|key, _| live.contains(key));
        Ok(true)
    }
}
