use std::future::Future;

use intentful_core::{status_hash, Metadata};
use serde_json::json;

use super::{check, make_provider, make_ref, TestResult};
use crate::{EntityFilter, Storage, StorageError};

pub(super) async fn run_entity_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: Storage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "entity",
            "create_starts_at_version_1",
            create_starts_at_version_1(factory().await).await,
        ),
        TestResult::from_result(
            "entity",
            "stale_spec_version_conflicts",
            stale_spec_version_conflicts(factory().await).await,
        ),
        TestResult::from_result(
            "entity",
            "missing_entity_not_found",
            missing_entity_not_found(factory().await).await,
        ),
        TestResult::from_result(
            "entity",
            "update_status_merges",
            update_status_merges(factory().await).await,
        ),
        TestResult::from_result(
            "entity",
            "replace_status_overwrites",
            replace_status_overwrites(factory().await).await,
        ),
        TestResult::from_result(
            "entity",
            "stale_status_hash_conflicts",
            stale_status_hash_conflicts(factory().await).await,
        ),
        TestResult::from_result(
            "entity",
            "delete_retains_version",
            delete_retains_version(factory().await).await,
        ),
        TestResult::from_result(
            "entity",
            "list_entities_filters",
            list_entities_filters(factory().await).await,
        ),
        TestResult::from_result(
            "entity",
            "random_specs_limited_to_kinds",
            random_specs_limited_to_kinds(factory().await).await,
        ),
    ]
}

async fn create_starts_at_version_1<S: Storage>(s: S) -> Result<(), String> {
    let r = make_ref("w1");
    let meta = s
        .update_spec(&Metadata::new(&r, 0), &json!({"size": 1}))
        .await
        .map_err(|e| format!("create: {e}"))?;
    check(meta.spec_version == 1, || {
        format!("expected spec_version 1, got {}", meta.spec_version)
    })?;
    let entity = s.get_entity(&r).await.map_err(|e| format!("get: {e}"))?;
    check(entity.spec == json!({"size": 1}), || {
        format!("unexpected spec {}", entity.spec)
    })?;
    check(entity.status.is_null(), || {
        format!("new entity status should be null, got {}", entity.status)
    })
}

async fn stale_spec_version_conflicts<S: Storage>(s: S) -> Result<(), String> {
    let r = make_ref("w1");
    let v1 = s
        .update_spec(&Metadata::new(&r, 0), &json!({"size": 1}))
        .await
        .map_err(|e| format!("create: {e}"))?;
    s.update_spec(&v1, &json!({"size": 2}))
        .await
        .map_err(|e| format!("update: {e}"))?;
    match s.update_spec(&v1, &json!({"size": 3})).await {
        Err(StorageError::SpecVersionConflict {
            expected: 1,
            current: 2,
            ..
        }) => Ok(()),
        other => Err(format!("expected SpecVersionConflict, got {other:?}")),
    }
}

async fn missing_entity_not_found<S: Storage>(s: S) -> Result<(), String> {
    match s.get_entity(&make_ref("nope")).await {
        Err(StorageError::EntityNotFound(_)) => {}
        other => return Err(format!("get: expected EntityNotFound, got {other:?}")),
    }
    match s
        .update_status(&make_ref("nope"), &json!({"size": 1}), None)
        .await
    {
        Err(StorageError::EntityNotFound(_)) => Ok(()),
        other => Err(format!("update_status: expected EntityNotFound, got {other:?}")),
    }
}

async fn update_status_merges<S: Storage>(s: S) -> Result<(), String> {
    let r = make_ref("w1");
    s.update_spec(&Metadata::new(&r, 0), &json!({"size": 1}))
        .await
        .map_err(|e| format!("create: {e}"))?;
    s.update_status(&r, &json!({"size": 1, "tag": "a"}), None)
        .await
        .map_err(|e| format!("first status: {e}"))?;
    let meta = s
        .update_status(&r, &json!({"tag": null, "ip": "10.0.0.1"}), None)
        .await
        .map_err(|e| format!("second status: {e}"))?;
    let entity = s.get_entity(&r).await.map_err(|e| format!("get: {e}"))?;
    let want = json!({"size": 1, "ip": "10.0.0.1"});
    check(entity.status == want, || {
        format!("expected {want}, got {}", entity.status)
    })?;
    check(meta.status_hash == Some(status_hash(&want)), || {
        "status_hash not recomputed after merge".to_string()
    })
}

async fn replace_status_overwrites<S: Storage>(s: S) -> Result<(), String> {
    let r = make_ref("w1");
    s.update_spec(&Metadata::new(&r, 0), &json!({"size": 1}))
        .await
        .map_err(|e| format!("create: {e}"))?;
    s.update_status(&r, &json!({"size": 1, "tag": "a"}), None)
        .await
        .map_err(|e| format!("update: {e}"))?;
    s.replace_status(&r, &json!({"size": 2}), None)
        .await
        .map_err(|e| format!("replace: {e}"))?;
    let entity = s.get_entity(&r).await.map_err(|e| format!("get: {e}"))?;
    check(entity.status == json!({"size": 2}), || {
        format!("expected replaced status, got {}", entity.status)
    })
}

async fn stale_status_hash_conflicts<S: Storage>(s: S) -> Result<(), String> {
    let r = make_ref("w1");
    s.update_spec(&Metadata::new(&r, 0), &json!({"size": 1}))
        .await
        .map_err(|e| format!("create: {e}"))?;
    let first = s
        .replace_status(&r, &json!({"size": 1}), None)
        .await
        .map_err(|e| format!("replace: {e}"))?;
    let hash = first.status_hash.clone().unwrap_or_default();
    s.replace_status(&r, &json!({"size": 2}), Some(&hash))
        .await
        .map_err(|e| format!("replace with current hash: {e}"))?;
    match s.replace_status(&r, &json!({"size": 3}), Some(&hash)).await {
        Err(StorageError::StatusHashConflict { .. }) => Ok(()),
        other => Err(format!("expected StatusHashConflict, got {other:?}")),
    }
}

async fn delete_retains_version<S: Storage>(s: S) -> Result<(), String> {
    let r = make_ref("w1");
    let v1 = s
        .update_spec(&Metadata::new(&r, 0), &json!({"size": 1}))
        .await
        .map_err(|e| format!("create: {e}"))?;
    s.update_spec(&v1, &json!({"size": 2}))
        .await
        .map_err(|e| format!("update: {e}"))?;
    let deleted = s.delete_entity(&r).await.map_err(|e| format!("delete: {e}"))?;
    check(deleted.metadata.deleted_at.is_some(), || {
        "deleted entity has no deleted_at".to_string()
    })?;
    match s.get_entity(&r).await {
        Err(StorageError::EntityNotFound(_)) => {}
        other => return Err(format!("expected EntityNotFound after delete, got {other:?}")),
    }
    let highest = s
        .highest_spec_version(&r)
        .await
        .map_err(|e| format!("highest: {e}"))?;
    check(highest == 2, || format!("expected retained version 2, got {highest}"))?;
    let revived = s
        .update_spec(&Metadata::new(&r, highest), &json!({"size": 5}))
        .await
        .map_err(|e| format!("recreate: {e}"))?;
    check(revived.spec_version == 3, || {
        format!("recreated entity should continue at 3, got {}", revived.spec_version)
    })
}

async fn list_entities_filters<S: Storage>(s: S) -> Result<(), String> {
    for (uuid, size) in [("a", 1), ("b", 2), ("c", 2)] {
        s.update_spec(&Metadata::new(&make_ref(uuid), 0), &json!({"size": size, "x": 0}))
            .await
            .map_err(|e| format!("create {uuid}: {e}"))?;
    }
    let filter = EntityFilter {
        kind: Some("widget".into()),
        spec: Some(json!({"size": 2})),
        ..Default::default()
    };
    let partial = s
        .list_entities(&filter, false)
        .await
        .map_err(|e| format!("list: {e}"))?;
    check(partial.len() == 2, || {
        format!("expected 2 partial matches, got {}", partial.len())
    })?;
    let exact = s
        .list_entities(&filter, true)
        .await
        .map_err(|e| format!("list exact: {e}"))?;
    check(exact.is_empty(), || {
        format!("expected no exact matches, got {}", exact.len())
    })
}

async fn random_specs_limited_to_kinds<S: Storage>(s: S) -> Result<(), String> {
    let provider = make_provider("1.0");
    let widget = provider.kind_ref(&provider.kinds[0]);
    for uuid in ["a", "b", "c", "d"] {
        s.update_spec(&Metadata::new(&make_ref(uuid), 0), &json!({"size": 1}))
            .await
            .map_err(|e| format!("create {uuid}: {e}"))?;
    }
    let label = intentful_core::EntityRef::new("test", "1.0", "label", "z");
    s.update_spec(&Metadata::new(&label, 0), &json!({"text": "hi"}))
        .await
        .map_err(|e| format!("create label: {e}"))?;

    let batch = s
        .list_random_intentful_specs(3, std::slice::from_ref(&widget))
        .await
        .map_err(|e| format!("list random: {e}"))?;
    check(batch.len() == 3, || format!("expected 3, got {}", batch.len()))?;
    check(batch.iter().all(|(m, _)| m.kind == "widget"), || {
        "random batch contains a kind that was not requested".to_string()
    })
}
