use std::future::Future;

use intentful_core::IntentfulStatus;
use time::OffsetDateTime;

use super::{check, make_ref, make_watcher, TestResult};
use crate::{Storage, StorageError, WatcherFilter, WatcherUpdate};

pub(super) async fn run_watcher_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: Storage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "watcher",
            "save_then_get",
            save_then_get(factory().await).await,
        ),
        TestResult::from_result(
            "watcher",
            "update_is_partial",
            update_is_partial(factory().await).await,
        ),
        TestResult::from_result(
            "watcher",
            "list_filters_by_entity_and_status",
            list_filters_by_entity_and_status(factory().await).await,
        ),
        TestResult::from_result(
            "watcher",
            "delete_then_not_found",
            delete_then_not_found(factory().await).await,
        ),
    ]
}

async fn save_then_get<S: Storage>(s: S) -> Result<(), String> {
    let w = make_watcher("w-1", &make_ref("a"), 2);
    s.save_watcher(&w).await.map_err(|e| format!("save: {e}"))?;
    let got = s.get_watcher("w-1").await.map_err(|e| format!("get: {e}"))?;
    check(got == w, || format!("round trip changed watcher: {got:?}"))
}

async fn update_is_partial<S: Storage>(s: S) -> Result<(), String> {
    let w = make_watcher("w-1", &make_ref("a"), 2);
    s.save_watcher(&w).await.map_err(|e| format!("save: {e}"))?;
    let at = OffsetDateTime::now_utc();
    let updated = s
        .update_watcher(
            "w-1",
            &WatcherUpdate {
                status: Some(IntentfulStatus::CompletedSuccessfully),
                last_status_changed: Some(at),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| format!("update: {e}"))?;
    check(updated.status == IntentfulStatus::CompletedSuccessfully, || {
        format!("status not updated: {:?}", updated.status)
    })?;
    check(updated.spec_version == 2 && updated.entity_ref == w.entity_ref, || {
        "update touched fields it did not name".to_string()
    })?;
    check(updated.last_status_changed == Some(at), || {
        "last_status_changed not stored".to_string()
    })
}

async fn list_filters_by_entity_and_status<S: Storage>(s: S) -> Result<(), String> {
    let a = make_ref("a");
    let b = make_ref("b");
    let mut done = make_watcher("w-2", &a, 1);
    done.status = IntentfulStatus::Outdated;
    for w in [make_watcher("w-1", &a, 2), done, make_watcher("w-3", &b, 1)] {
        s.save_watcher(&w).await.map_err(|e| format!("save: {e}"))?;
    }
    let active_a = s
        .list_watchers(&WatcherFilter::active_for(&a))
        .await
        .map_err(|e| format!("list: {e}"))?;
    check(active_a.len() == 1 && active_a[0].uuid == "w-1", || {
        format!("expected only w-1, got {:?}", uuids(&active_a))
    })?;
    let all = s
        .list_watchers(&WatcherFilter::default())
        .await
        .map_err(|e| format!("list all: {e}"))?;
    check(all.len() == 3, || format!("expected 3 watchers, got {}", all.len()))
}

async fn delete_then_not_found<S: Storage>(s: S) -> Result<(), String> {
    s.save_watcher(&make_watcher("w-1", &make_ref("a"), 1))
        .await
        .map_err(|e| format!("save: {e}"))?;
    s.delete_watcher("w-1")
        .await
        .map_err(|e| format!("delete: {e}"))?;
    match s.get_watcher("w-1").await {
        Err(StorageError::WatcherNotFound(_)) => Ok(()),
        other => Err(format!("expected WatcherNotFound, got {other:?}")),
    }
}

fn uuids(watchers: &[intentful_core::IntentWatcher]) -> Vec<&str> {
    watchers.iter().map(|w| w.uuid.as_str()).collect()
}
