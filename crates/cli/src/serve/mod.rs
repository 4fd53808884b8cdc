//! HTTP API server for the reconciliation engine.
//!
//! Serves the provider, entity and intent watcher endpoints over an
//! in-memory store while the reconciliation loops run alongside.

mod handlers;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use intentful_engine::{Engine, EngineConfig, EngineError, HttpIntentHandler, IntentHandler};
use intentful_storage::{MemoryStorage, StorageError};
use tokio::task::JoinSet;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::commands::read_provider;
use state::AppState;

/// Start the server and the reconciliation loops.
///
/// Returns when the server shuts down (Ctrl+C) or as soon as any loop
/// exits, which is always fatal.
pub(crate) async fn start_server(
    config: EngineConfig,
    providers: Vec<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::new(Arc::new(MemoryStorage::new()));

    for path in &providers {
        let provider = read_provider(path)?;
        engine
            .register_provider(provider)
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))?;
    }

    let handler: Arc<dyn IntentHandler> =
        Arc::new(HttpIntentHandler::new(config.handler_timeout()));
    let reconcilers = engine.reconcilers(&config, handler);
    let mut loops = JoinSet::new();
    loops.spawn(reconcilers.diff_resolver.run());
    loops.spawn(reconcilers.intent_resolver.run());
    loops.spawn(reconcilers.change_listener.run());

    let state = Arc::new(AppState { engine });
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        addr = %addr,
        providers = providers.len(),
        "intentful engine listening"
    );

    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    };

    tokio::select! {
        result = server => {
            result?;
            info!("server stopped");
            Ok(())
        }
        Some(joined) = loops.join_next() => {
            let message = match joined {
                Ok(Ok(())) => "reconciliation loop exited".to_string(),
                Ok(Err(e)) => format!("reconciliation loop failed: {}", e),
                Err(e) => format!("reconciliation loop panicked: {}", e),
            };
            error!(error = %message, "shutting down");
            Err(message.into())
        }
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::handle_health))
        .route("/provider", post(handlers::handle_register_provider))
        .route(
            "/provider/update_status",
            post(handlers::handle_update_status),
        )
        .route(
            "/provider/{prefix}/{version}",
            get(handlers::handle_get_provider).delete(handlers::handle_unregister_provider),
        )
        .route(
            "/services/intent_watcher",
            get(handlers::handle_filter_watchers),
        )
        .route(
            "/services/intent_watcher/{uuid}",
            get(handlers::handle_get_watcher),
        )
        .route(
            "/services/{prefix}/{version}/{kind}",
            get(handlers::handle_list_entities).post(handlers::handle_create_entity),
        )
        .route(
            "/services/{prefix}/{version}/{kind}/{uuid}",
            get(handlers::handle_get_entity)
                .put(handlers::handle_update_entity)
                .delete(handlers::handle_delete_entity),
        )
        .fallback(handlers::handle_not_found)
        .layer(cors)
        .with_state(state)
}

/// Build a JSON error response with the given status code and message.
pub(crate) fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({ "error": msg })))
}

/// HTTP status for an engine error.
pub(crate) fn error_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Storage(e) => match e {
            StorageError::EntityNotFound(_)
            | StorageError::WatcherNotFound(_)
            | StorageError::ProviderNotFound { .. }
            | StorageError::KindNotFound(_) => StatusCode::NOT_FOUND,
            StorageError::EntityExists(_)
            | StorageError::SpecVersionConflict { .. }
            | StorageError::StatusHashConflict { .. } => StatusCode::CONFLICT,
            StorageError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        EngineError::Diff(_) | EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::Handler(_) | EngineError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Wait for Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "could not install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
