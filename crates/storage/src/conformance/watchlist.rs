use std::future::Future;

use intentful_core::Watchlist;

use super::{check, make_ref, TestResult};
use crate::Storage;

pub(super) async fn run_watchlist_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: Storage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "watchlist",
            "starts_empty",
            starts_empty(factory().await).await,
        ),
        TestResult::from_result(
            "watchlist",
            "edit_commits_and_bumps_version",
            edit_commits_and_bumps_version(factory().await).await,
        ),
        TestResult::from_result(
            "watchlist",
            "edit_sees_previous_edits",
            edit_sees_previous_edits(factory().await).await,
        ),
    ]
}

async fn starts_empty<S: Storage>(s: S) -> Result<(), String> {
    let wl = s.get_watchlist().await.map_err(|e| format!("get: {e}"))?;
    check(wl.is_empty(), || format!("expected empty, got {} entries", wl.len()))
}

async fn edit_commits_and_bumps_version<S: Storage>(s: S) -> Result<(), String> {
    let before = s.get_watchlist().await.map_err(|e| format!("get: {e}"))?;
    let edited = s
        .edit_watchlist(Box::new(|wl: &mut Watchlist| {
            wl.track(make_ref("a"));
        }))
        .await
        .map_err(|e| format!("edit: {e}"))?;
    check(edited.version > before.version, || {
        format!(
            "version not bumped: {} -> {}",
            before.version, edited.version
        )
    })?;
    let after = s.get_watchlist().await.map_err(|e| format!("get: {e}"))?;
    check(after.has(&make_ref("a")), || {
        "edit not visible to later reads".to_string()
    })?;
    check(after == edited, || "edit result differs from stored snapshot".to_string())
}

async fn edit_sees_previous_edits<S: Storage>(s: S) -> Result<(), String> {
    s.edit_watchlist(Box::new(|wl: &mut Watchlist| {
        wl.track(make_ref("a"));
    }))
    .await
    .map_err(|e| format!("first edit: {e}"))?;

    let mut saw_a = false;
    s.edit_watchlist(Box::new(|wl: &mut Watchlist| {
        saw_a = wl.has(&make_ref("a"));
        wl.delete(&make_ref("a"));
        wl.track(make_ref("b"));
    }))
    .await
    .map_err(|e| format!("second edit: {e}"))?;
    check(saw_a, || "second edit did not observe the first".to_string())?;

    let wl = s.get_watchlist().await.map_err(|e| format!("get: {e}"))?;
    check(!wl.has(&make_ref("a")) && wl.has(&make_ref("b")), || {
        format!("unexpected entries: {:?}", wl.entity_refs())
    })
}
