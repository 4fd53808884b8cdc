//! The watchlist: entities with outstanding diffs awaiting resolution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{Backoff, Diff, EntityRef};

/// A diff the resolver tracks, with its retry state once dispatched.
pub type DiffPair = (Diff, Option<Backoff>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub entity_ref: EntityRef,
    pub diffs: Vec<DiffPair>,
    /// Bumped by [`Watchlist::touch`] whenever the entity's spec is written.
    #[serde(default)]
    pub revision: u64,
}

/// Versioned snapshot. Stores bump `version` on every committed edit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Watchlist {
    pub version: u64,
    entries: BTreeMap<String, WatchlistEntry>,
}

impl Watchlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, entity_ref: &EntityRef) -> bool {
        self.entries.contains_key(&entity_ref.key())
    }

    pub fn get(&self, entity_ref: &EntityRef) -> Option<&WatchlistEntry> {
        self.entries.get(&entity_ref.key())
    }

    pub fn get_mut(&mut self, entity_ref: &EntityRef) -> Option<&mut WatchlistEntry> {
        self.entries.get_mut(&entity_ref.key())
    }

    /// Insert the entry for `entity_ref`, or replace its diffs keeping the
    /// revision.
    pub fn set(&mut self, entity_ref: EntityRef, diffs: Vec<DiffPair>) {
        match self.entries.get_mut(&entity_ref.key()) {
            Some(entry) => entry.diffs = diffs,
            None => {
                self.entries.insert(
                    entity_ref.key(),
                    WatchlistEntry {
                        entity_ref,
                        diffs,
                        revision: 0,
                    },
                );
            }
        }
    }

    /// Revision of the entry for `entity_ref`, if tracked.
    pub fn revision(&self, entity_ref: &EntityRef) -> Option<u64> {
        self.get(entity_ref).map(|e| e.revision)
    }

    /// Add `entity_ref` with no known diffs unless it is already tracked.
    pub fn track(&mut self, entity_ref: EntityRef) -> bool {
        if self.has(&entity_ref) {
            return false;
        }
        self.set(entity_ref, Vec::new());
        true
    }

    /// Record a spec write: track the entity, or bump the revision of its
    /// existing entry so readers holding an older snapshot can tell.
    pub fn touch(&mut self, entity_ref: EntityRef) {
        match self.get_mut(&entity_ref) {
            Some(entry) => entry.revision = entry.revision.wrapping_add(1),
            None => self.set(entity_ref, Vec::new()),
        }
    }

    pub fn delete(&mut self, entity_ref: &EntityRef) -> Option<WatchlistEntry> {
        self.entries.remove(&entity_ref.key())
    }

    pub fn entries(&self) -> impl Iterator<Item = &WatchlistEntry> {
        self.entries.values()
    }

    pub fn entity_refs(&self) -> Vec<EntityRef> {
        self.entries.values().map(|e| e.entity_ref.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
