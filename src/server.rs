//! HTTP facade serving the cached device resources.
//!
//! Handlers only read the [`StateStore`]; nothing here talks to the device.

use crate::state::StateStore;
use axum::extract::State;
use axum::http::header::{ALLOW, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

const NO_STORE: &str = "no-store";

#[derive(Debug, Clone)]
pub struct AppState {
    pub store: StateStore,
    /// Upstream address reported on `/bridge/status`.
    pub device: Arc<str>,
}

impl AppState {
    pub fn new(store: StateStore, device: &str) -> Self {
        Self {
            store,
            device: Arc::from(device),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/runtime.json", get(runtime).fallback(method_not_allowed))
        .route("/runtime_meta.json", get(runtime_meta).fallback(method_not_allowed))
        .route("/config.json", get(config).fallback(method_not_allowed))
        .route("/bridge/status", get(status).fallback(method_not_allowed))
        .route("/version", get(version).fallback(method_not_allowed))
        .route("/user_theme.css", get(user_css).fallback(method_not_allowed))
        .fallback(not_found)
        .with_state(state)
}

/// Serve until `shutdown` flips to `true` or its sender is dropped.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("listening on http://{}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

fn json_response(body: Value) -> Response {
    ([(CACHE_CONTROL, NO_STORE)], Json(body)).into_response()
}

fn text_response(content_type: &'static str, body: String) -> Response {
    ([(CONTENT_TYPE, content_type), (CACHE_CONTROL, NO_STORE)], body).into_response()
}

async fn runtime(State(state): State<AppState>) -> Response {
    json_response(state.store.runtime().await.unwrap_or_else(|| json!({})))
}

async fn runtime_meta(State(state): State<AppState>) -> Response {
    json_response(state.store.runtime_meta().await.unwrap_or_else(|| json!([])))
}

async fn config(State(state): State<AppState>) -> Response {
    let config = state.store.config().await.unwrap_or_else(|| json!({}));
    json_response(json!({ "config": config }))
}

async fn status(State(state): State<AppState>) -> Response {
    let status = state.store.status(&state.device).await;
    ([(CACHE_CONTROL, NO_STORE)], Json(status)).into_response()
}

async fn version(State(state): State<AppState>) -> Response {
    text_response("text/plain", state.store.version().await.unwrap_or_default())
}

async fn user_css(State(state): State<AppState>) -> Response {
    text_response("text/css", state.store.user_css().await.unwrap_or_default())
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, [(CACHE_CONTROL, NO_STORE)], "not found").into_response()
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(ALLOW, "GET, HEAD"), (CACHE_CONTROL, NO_STORE)],
        "method not allowed",
    )
        .into_response()
}
