use std::future::Future;

use intentful_core::KindRef;

use super::{check, make_provider, TestResult};
use crate::{Storage, StorageError};

pub(super) async fn run_provider_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: Storage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "provider",
            "save_then_get_kind",
            save_then_get_kind(factory().await).await,
        ),
        TestResult::from_result(
            "provider",
            "intentful_kinds_are_differ_based_only",
            intentful_kinds_are_differ_based_only(factory().await).await,
        ),
        TestResult::from_result(
            "provider",
            "delete_then_not_found",
            delete_then_not_found(factory().await).await,
        ),
    ]
}

async fn save_then_get_kind<S: Storage>(s: S) -> Result<(), String> {
    s.save_provider(&make_provider("1.0"))
        .await
        .map_err(|e| format!("save: {e}"))?;
    let kind = s
        .get_kind(&KindRef {
            provider_prefix: "test".into(),
            provider_version: "1.0".into(),
            kind: "widget".into(),
        })
        .await
        .map_err(|e| format!("get_kind: {e}"))?;
    check(kind.name == "widget", || format!("wrong kind {}", kind.name))?;
    match s
        .get_kind(&KindRef {
            provider_prefix: "test".into(),
            provider_version: "1.0".into(),
            kind: "gadget".into(),
        })
        .await
    {
        Err(StorageError::KindNotFound(_)) => Ok(()),
        other => Err(format!("expected KindNotFound, got {other:?}")),
    }
}

async fn intentful_kinds_are_differ_based_only<S: Storage>(s: S) -> Result<(), String> {
    s.save_provider(&make_provider("1.0"))
        .await
        .map_err(|e| format!("save 1.0: {e}"))?;
    s.save_provider(&make_provider("2.0"))
        .await
        .map_err(|e| format!("save 2.0: {e}"))?;
    let kinds = s
        .get_intentful_kinds()
        .await
        .map_err(|e| format!("kinds: {e}"))?;
    check(kinds.len() == 2, || format!("expected 2 kinds, got {kinds:?}"))?;
    check(kinds.iter().all(|k| k.kind == "widget"), || {
        format!("non differ-based kind listed: {kinds:?}")
    })
}

async fn delete_then_not_found<S: Storage>(s: S) -> Result<(), String> {
    s.save_provider(&make_provider("1.0"))
        .await
        .map_err(|e| format!("save: {e}"))?;
    s.delete_provider("test", "1.0")
        .await
        .map_err(|e| format!("delete: {e}"))?;
    match s.get_provider("test", "1.0").await {
        Err(StorageError::ProviderNotFound { .. }) => Ok(()),
        other => Err(format!("expected ProviderNotFound, got {other:?}")),
    }
}
