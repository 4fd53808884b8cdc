use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use intentful_core::{EntityRef, IntentfulStatus, Metadata, Provider, Spec, Status};
use intentful_engine::EngineError;
use intentful_storage::{EntityFilter, WatcherFilter};
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::state::AppState;
use super::{error_status, json_error};

fn engine_error(err: EngineError) -> Response {
    json_error(error_status(&err), &err.to_string()).into_response()
}

fn ok<T: Serialize>(result: Result<T, EngineError>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => engine_error(e),
    }
}

// ── Requests ──────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct CreateEntityRequest {
    spec: Spec,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    user: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateEntityRequest {
    spec: Spec,
    /// The spec version the caller last read.
    spec_version: u64,
    #[serde(default)]
    user: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusRequest {
    entity_ref: EntityRef,
    status: Status,
    #[serde(default)]
    status_hash: Option<String>,
    /// Overwrite instead of merging.
    #[serde(default)]
    replace: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WatcherQuery {
    status: Option<IntentfulStatus>,
    spec_version: Option<u64>,
    uuid: Option<String>,
}

// ── Health / fallback ─────────────────────────

pub(crate) async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

// ── Providers ─────────────────────────────────

pub(crate) async fn handle_register_provider(
    State(state): State<Arc<AppState>>,
    Json(provider): Json<Provider>,
) -> Response {
    ok(state.engine.register_provider(provider).await)
}

pub(crate) async fn handle_get_provider(
    State(state): State<Arc<AppState>>,
    Path((prefix, version)): Path<(String, String)>,
) -> Response {
    ok(state.engine.get_provider(&prefix, &version).await)
}

pub(crate) async fn handle_unregister_provider(
    State(state): State<Arc<AppState>>,
    Path((prefix, version)): Path<(String, String)>,
) -> Response {
    match state.engine.unregister_provider(&prefix, &version).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => engine_error(e),
    }
}

/// Handler callback: report observed state for an entity.
pub(crate) async fn handle_update_status(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StatusRequest>,
) -> Response {
    let hash = req.status_hash.as_deref();
    let result = if req.replace {
        state
            .engine
            .replace_status(&req.entity_ref, &req.status, hash)
            .await
    } else {
        state
            .engine
            .update_status(&req.entity_ref, &req.status, hash)
            .await
    };
    ok(result)
}

// ── Entities ──────────────────────────────────

pub(crate) async fn handle_create_entity(
    State(state): State<Arc<AppState>>,
    Path((prefix, version, kind)): Path<(String, String, String)>,
    Json(req): Json<CreateEntityRequest>,
) -> Response {
    ok(state
        .engine
        .save_entity(&prefix, &version, &kind, req.spec, req.uuid, req.user)
        .await)
}

pub(crate) async fn handle_list_entities(
    State(state): State<Arc<AppState>>,
    Path((prefix, version, kind)): Path<(String, String, String)>,
) -> Response {
    let filter = EntityFilter {
        provider_prefix: Some(prefix),
        provider_version: Some(version),
        kind: Some(kind),
        ..Default::default()
    };
    ok(state.engine.list_entities(&filter, false).await)
}

pub(crate) async fn handle_get_entity(
    State(state): State<Arc<AppState>>,
    Path((prefix, version, kind, uuid)): Path<(String, String, String, String)>,
) -> Response {
    let entity_ref = EntityRef::new(prefix, version, kind, uuid);
    ok(state.engine.get_entity(&entity_ref).await)
}

pub(crate) async fn handle_update_entity(
    State(state): State<Arc<AppState>>,
    Path((prefix, version, kind, uuid)): Path<(String, String, String, String)>,
    Json(req): Json<UpdateEntityRequest>,
) -> Response {
    let entity_ref = EntityRef::new(prefix, version, kind, uuid);
    let metadata = Metadata::new(&entity_ref, req.spec_version);
    ok(state
        .engine
        .update_entity_spec(&metadata, req.spec, req.user)
        .await)
}

pub(crate) async fn handle_delete_entity(
    State(state): State<Arc<AppState>>,
    Path((prefix, version, kind, uuid)): Path<(String, String, String, String)>,
) -> Response {
    let entity_ref = EntityRef::new(prefix, version, kind, uuid);
    ok(state.engine.delete_entity(&entity_ref).await)
}

// ── Intent watchers ───────────────────────────

pub(crate) async fn handle_get_watcher(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Response {
    ok(state.engine.get_intent_watcher(&uuid).await)
}

pub(crate) async fn handle_filter_watchers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WatcherQuery>,
) -> Response {
    let filter = WatcherFilter {
        status: query.status,
        spec_version: query.spec_version,
        entity_ref: None,
        uuid: query.uuid,
    };
    ok(state.engine.filter_intent_watcher(&filter).await)
}
