//! Data model shared by the storage layer and the reconciliation engine.
//!
//! Spec and status trees are opaque JSON documents; everything the engine
//! needs to know about an entity type lives on [`Kind`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// Desired state supplied by a client.
pub type Spec = Value;
/// Observed state reported by intent handlers.
pub type Status = Value;

// ──────────────────────────────────────────────
// References
// ──────────────────────────────────────────────

/// Identifies one registered provider version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderRef {
    pub provider_prefix: String,
    pub provider_version: String,
}

/// Identifies a kind under a provider version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KindRef {
    pub provider_prefix: String,
    pub provider_version: String,
    pub kind: String,
}

impl fmt::Display for KindRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.provider_prefix, self.provider_version, self.kind
        )
    }
}

/// Identifies one entity. Two references are equal when all four parts match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub provider_prefix: String,
    pub provider_version: String,
    pub kind: String,
    pub uuid: String,
}

impl EntityRef {
    pub fn new(
        provider_prefix: impl Into<String>,
        provider_version: impl Into<String>,
        kind: impl Into<String>,
        uuid: impl Into<String>,
    ) -> Self {
        EntityRef {
            provider_prefix: provider_prefix.into(),
            provider_version: provider_version.into(),
            kind: kind.into(),
            uuid: uuid.into(),
        }
    }

    /// Stable string key, used to index watchlist entries and in-flight work.
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.provider_prefix, self.provider_version, self.kind, self.uuid
        )
    }

    pub fn provider(&self) -> ProviderRef {
        ProviderRef {
            provider_prefix: self.provider_prefix.clone(),
            provider_version: self.provider_version.clone(),
        }
    }

    pub fn kind_ref(&self) -> KindRef {
        KindRef {
            provider_prefix: self.provider_prefix.clone(),
            provider_version: self.provider_version.clone(),
            kind: self.kind.clone(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

// ──────────────────────────────────────────────
// Entities
// ──────────────────────────────────────────────

/// Entity metadata. `spec_version` increases by one on every accepted spec write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub uuid: String,
    pub kind: String,
    pub provider_prefix: String,
    pub provider_version: String,
    #[serde(default)]
    pub spec_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_hash: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub deleted_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extension: BTreeMap<String, Value>,
}

impl Metadata {
    /// Fresh metadata for `entity_ref` at the given spec version.
    pub fn new(entity_ref: &EntityRef, spec_version: u64) -> Self {
        Metadata {
            uuid: entity_ref.uuid.clone(),
            kind: entity_ref.kind.clone(),
            provider_prefix: entity_ref.provider_prefix.clone(),
            provider_version: entity_ref.provider_version.clone(),
            spec_version,
            status_hash: None,
            created_at: None,
            deleted_at: None,
            extension: BTreeMap::new(),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(
            &self.provider_prefix,
            &self.provider_version,
            &self.kind,
            &self.uuid,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: Spec,
    #[serde(default)]
    pub status: Status,
}

/// SHA-256 of the canonical JSON encoding of `status`, hex encoded.
///
/// `serde_json` keeps object keys sorted, so equal documents hash equally.
pub fn status_hash(status: &Status) -> String {
    let encoded = serde_json::to_vec(status).unwrap_or_default();
    format!("{:x}", Sha256::digest(&encoded))
}

// ──────────────────────────────────────────────
// Kinds and providers
// ──────────────────────────────────────────────

/// How spec writes for a kind turn into status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntentfulBehaviour {
    /// Status is merged from spec on every write.
    #[serde(alias = "basic")]
    ImmediateMirror,
    /// Status is replaced by spec on every write.
    SpecOnly,
    /// Status converges asynchronously through intent handlers.
    #[serde(alias = "differ")]
    DifferBased,
}

/// Which outstanding diff the resolver acts on next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffSelection {
    #[default]
    Basic,
    Random,
}

/// A field-selection pattern and the handler that resolves its differences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentfulSignature {
    #[serde(default)]
    pub name: String,
    pub signature: String,
    pub procedure_callback: String,
    /// Base URL of the handler's service, used for health checks.
    #[serde(default)]
    pub base_callback: String,
}

impl IntentfulSignature {
    pub fn healthcheck_url(&self) -> String {
        format!("{}/healthcheck", self.base_callback.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kind {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_plural: Option<String>,
    /// Schemas keyed by name; the kind's own schema lives under `name`.
    #[serde(default)]
    pub kind_structure: Value,
    pub intentful_behaviour: IntentfulBehaviour,
    #[serde(default)]
    pub intentful_signatures: Vec<IntentfulSignature>,
    /// Signature -> signatures it depends on. Carried but not used for ordering.
    #[serde(default)]
    pub dependency_tree: BTreeMap<String, Vec<String>>,
    /// Base entropy in seconds added to every computed retry delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_delay: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_retry_exponent: Option<f64>,
    #[serde(default)]
    pub diff_selection_strategy: DiffSelection,
}

impl Kind {
    pub fn schema(&self) -> Option<&Value> {
        self.kind_structure.get(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub prefix: String,
    pub version: String,
    #[serde(default)]
    pub kinds: Vec<Kind>,
    #[serde(default)]
    pub extension_structure: Value,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
}

impl Provider {
    pub fn provider_ref(&self) -> ProviderRef {
        ProviderRef {
            provider_prefix: self.prefix.clone(),
            provider_version: self.version.clone(),
        }
    }

    pub fn find_kind(&self, name: &str) -> Option<&Kind> {
        self.kinds.iter().find(|k| k.name == name)
    }

    pub fn kind_ref(&self, kind: &Kind) -> KindRef {
        KindRef {
            provider_prefix: self.prefix.clone(),
            provider_version: self.version.clone(),
            kind: kind.name.clone(),
        }
    }
}

// ──────────────────────────────────────────────
// Diffs
// ──────────────────────────────────────────────

/// One step of a diff path: an object key or a spec array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Field(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{}", i),
            PathSegment::Field(name) => f.write_str(name),
        }
    }
}

/// A single spec/status mismatch located by a signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffField {
    /// Vector keys matched on the way down, e.g. `{"id": 3}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, Value>,
    pub key: String,
    pub path: Vec<PathSegment>,
    pub spec: Vec<Value>,
    pub status: Vec<Value>,
}

/// Result of matching one signature against an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub kind: String,
    pub intentful_signature: IntentfulSignature,
    pub diff_fields: Vec<DiffField>,
    /// Health endpoint recorded when the diff was first dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_url: Option<String>,
}

impl Diff {
    /// Structural equality ignoring dispatch bookkeeping.
    pub fn same_as(&self, other: &Diff) -> bool {
        self.kind == other.kind
            && self.intentful_signature == other.intentful_signature
            && self.diff_fields == other.diff_fields
    }
}

// ──────────────────────────────────────────────
// Backoff
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delay {
    pub delay_seconds: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub delay_set_time: OffsetDateTime,
}

impl Delay {
    pub fn starting_now(delay_seconds: f64) -> Self {
        Delay {
            delay_seconds,
            delay_set_time: OffsetDateTime::now_utc(),
        }
    }

    /// True once strictly more than `delay_seconds` passed since it was set.
    pub fn has_elapsed(&self, now: OffsetDateTime) -> bool {
        (now - self.delay_set_time).as_seconds_f64() > self.delay_seconds
    }
}

/// Per-diff retry state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub delay: Delay,
    pub retries: u32,
}

// ──────────────────────────────────────────────
// Intent watchers
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentfulStatus {
    Active,
    CompletedSuccessfully,
    CompletedPartially,
    Outdated,
}

impl IntentfulStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, IntentfulStatus::Active)
    }
}

/// Reconciliation progress of one spec change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentWatcher {
    pub uuid: String,
    pub entity_ref: EntityRef,
    pub spec_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    #[serde(default)]
    pub diffs: Vec<Diff>,
    pub status: IntentfulStatus,
    /// Diffs already resolved by earlier resolver passes.
    #[serde(default)]
    pub resolved_diff_count: usize,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_status_changed: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Watcher as returned by listings: no diff detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentWatcherSummary {
    pub uuid: String,
    pub entity_ref: EntityRef,
    pub spec_version: u64,
    pub status: IntentfulStatus,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_status_changed: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&IntentWatcher> for IntentWatcherSummary {
    fn from(w: &IntentWatcher) -> Self {
        IntentWatcherSummary {
            uuid: w.uuid.clone(),
            entity_ref: w.entity_ref.clone(),
            spec_version: w.spec_version,
            status: w.status,
            last_status_changed: w.last_status_changed,
            created_at: w.created_at,
        }
    }
}
