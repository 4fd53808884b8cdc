use std::future::Future;
use std::sync::Arc;

use intentful_core::{Metadata, Watchlist};
use serde_json::json;

use super::{check, make_ref, TestResult};
use crate::{Storage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: Storage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "concurrent_spec_updates_exactly_one_wins",
            concurrent_spec_updates_exactly_one_wins(factory().await).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_watchlist_edits_all_survive",
            concurrent_watchlist_edits_all_survive(factory().await).await,
        ),
    ]
}

// ── Concurrent spec update: exactly one wins ────────────────────────────────

/// N tasks race to update the same entity from spec_version 1. Exactly one
/// write is accepted; the rest get SpecVersionConflict.
async fn concurrent_spec_updates_exactly_one_wins<S: Storage>(s: S) -> Result<(), String> {
    let storage = Arc::new(s);
    let r = make_ref("race");
    let v1 = storage
        .update_spec(&Metadata::new(&r, 0), &json!({"size": 0}))
        .await
        .map_err(|e| format!("create: {e}"))?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        let meta = v1.clone();
        handles.push(tokio::spawn(async move {
            match s.update_spec(&meta, &json!({ "size": i })).await {
                Ok(_) => Ok(true),
                Err(StorageError::SpecVersionConflict { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }
    check(winners == 1, || format!("expected exactly 1 winner, got {winners}"))?;

    let entity = storage
        .get_entity(&r)
        .await
        .map_err(|e| format!("get: {e}"))?;
    check(entity.metadata.spec_version == 2, || {
        format!("expected spec_version 2, got {}", entity.metadata.spec_version)
    })
}

// ── Concurrent watchlist edits: none are lost ───────────────────────────────

/// N tasks each add a distinct entity through `edit_watchlist`. Serialized
/// edits must leave all N entries and N version bumps.
async fn concurrent_watchlist_edits_all_survive<S: Storage>(s: S) -> Result<(), String> {
    let storage = Arc::new(s);
    let start = storage
        .get_watchlist()
        .await
        .map_err(|e| format!("get: {e}"))?
        .version;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let r = make_ref(&format!("entity-{i}"));
            s.edit_watchlist(Box::new(move |wl: &mut Watchlist| {
                wl.track(r);
            }))
            .await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("edit: {e}"))?;
    }

    let wl = storage
        .get_watchlist()
        .await
        .map_err(|e| format!("get: {e}"))?;
    check(wl.len() == N, || format!("expected {N} entries, got {}", wl.len()))?;
    check(wl.version == start + N as u64, || {
        format!("expected version {}, got {}", start + N as u64, wl.version)
    })
}
