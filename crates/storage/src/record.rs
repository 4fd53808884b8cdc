use intentful_core::{Diff, EntityRef, IntentWatcher, IntentfulStatus, Metadata};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Partial update applied to a stored intent watcher. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatcherUpdate {
    pub status: Option<IntentfulStatus>,
    pub diffs: Option<Vec<Diff>>,
    pub resolved_diff_count: Option<usize>,
    pub last_status_changed: Option<OffsetDateTime>,
}

impl WatcherUpdate {
    pub fn apply(&self, watcher: &mut IntentWatcher) {
        if let Some(status) = self.status {
            watcher.status = status;
        }
        if let Some(diffs) = &self.diffs {
            watcher.diffs = diffs.clone();
        }
        if let Some(count) = self.resolved_diff_count {
            watcher.resolved_diff_count = count;
        }
        if let Some(at) = self.last_status_changed {
            watcher.last_status_changed = Some(at);
        }
    }
}

/// Criteria for listing intent watchers. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatcherFilter {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub entity_ref: Option<EntityRef>,
    #[serde(default)]
    pub status: Option<IntentfulStatus>,
    #[serde(default)]
    pub spec_version: Option<u64>,
}

impl WatcherFilter {
    pub fn active_for(entity_ref: &EntityRef) -> Self {
        WatcherFilter {
            entity_ref: Some(entity_ref.clone()),
            status: Some(IntentfulStatus::Active),
            ..Default::default()
        }
    }

    pub fn matches(&self, watcher: &IntentWatcher) -> bool {
        self.uuid.as_ref().map_or(true, |u| *u == watcher.uuid)
            && self
                .entity_ref
                .as_ref()
                .map_or(true, |r| *r == watcher.entity_ref)
            && self.status.map_or(true, |s| s == watcher.status)
            && self.spec_version.map_or(true, |v| v == watcher.spec_version)
    }
}

/// Criteria for listing entities.
///
/// With `exact_match`, `spec`/`status` must equal the stored documents.
/// Otherwise they match when every member they name is present with an
/// equal value (recursively for nested objects).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFilter {
    #[serde(default)]
    pub provider_prefix: Option<String>,
    #[serde(default)]
    pub provider_version: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub spec: Option<Value>,
    #[serde(default)]
    pub status: Option<Value>,
}

impl EntityFilter {
    pub fn matches(&self, metadata: &Metadata, spec: &Value, status: &Value, exact: bool) -> bool {
        let doc_matches = |wanted: &Option<Value>, actual: &Value| match wanted {
            None => true,
            Some(w) if exact => w == actual,
            Some(w) => contains(actual, w),
        };
        self.provider_prefix
            .as_ref()
            .map_or(true, |p| *p == metadata.provider_prefix)
            && self
                .provider_version
                .as_ref()
                .map_or(true, |v| *v == metadata.provider_version)
            && self.kind.as_ref().map_or(true, |k| *k == metadata.kind)
            && self.uuid.as_ref().map_or(true, |u| *u == metadata.uuid)
            && doc_matches(&self.spec, spec)
            && doc_matches(&self.status, status)
    }
}

fn contains(actual: &Value, wanted: &Value) -> bool {
    match (actual, wanted) {
        (Value::Object(a), Value::Object(w)) => w
            .iter()
            .all(|(k, wv)| a.get(k).is_some_and(|av| contains(av, wv))),
        (a, w) => a == w,
    }
}
