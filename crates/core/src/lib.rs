//! intentful-core: data model and diff engine for intentful reconciliation.
//!
//! # Public API
//!
//! - [`Differ`] -- compiles signature patterns and computes [`Diff`]s
//! - [`Watchlist`] -- entities with outstanding diffs
//! - [`CompiledSfs`] -- a compiled field-selection pattern
//! - model types: [`Entity`], [`Kind`], [`Provider`], [`IntentWatcher`], ...

pub mod differ;
pub mod error;
pub mod model;
pub mod patch;
pub mod sanitize;
pub mod sfs;
pub mod watchlist;

// ── Convenience re-exports ───────────────────────────────────────────

pub use differ::{get_diff_path_value, Differ, Diffs};
pub use error::{DiffError, SfsError};
pub use model::{
    status_hash, Backoff, Delay, Diff, DiffField, DiffSelection, Entity, EntityRef,
    IntentWatcher, IntentWatcherSummary, IntentfulBehaviour, IntentfulSignature,
    IntentfulStatus, Kind, KindRef, Metadata, PathSegment, Provider, ProviderRef, Spec, Status,
};
pub use patch::merge_patch;
pub use sfs::CompiledSfs;
pub use watchlist::{DiffPair, Watchlist, WatchlistEntry};
