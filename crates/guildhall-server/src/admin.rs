//! Cache administration endpoints.
//!
//! - `GET /admin/cache/metrics` - Counters for the primary and fallback tiers
//! - `POST /admin/cache/metrics/reset` - Zero both tiers' counters
//! - `DELETE /admin/cache` - Remove every key in the active namespace
//! - `DELETE /admin/cache/keys?pattern=<glob>` - Remove keys matching a glob

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use guildhall_cache::KeyPattern;
use serde::Deserialize;
use serde_json::json;

use crate::server::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/cache", delete(flush_cache))
        .route("/admin/cache/keys", delete(delete_keys))
        .route("/admin/cache/metrics", get(cache_metrics))
        .route("/admin/cache/metrics/reset", post(reset_metrics))
}

pub async fn cache_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let ctx = &state.cache;
    Json(json!({
        "backend": ctx.backend(),
        "cache": ctx.cache.metrics(),
        "fallback": ctx.fallback.metrics(),
        "local_entries": ctx.fallback.local().len(),
        "remote_available": ctx.fallback.is_remote_available(),
    }))
}

pub async fn reset_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.cache.cache.reset_metrics();
    state.cache.fallback.reset_metrics();
    tracing::info!("cache metrics reset");
    StatusCode::NO_CONTENT
}

pub async fn flush_cache(State(state): State<AppState>) -> impl IntoResponse {
    let cleared = state.cache.cache.flush().await;
    state.cache.fallback.local().clear();
    Json(json!({ "cleared": cleared }))
}

#[derive(Debug, Deserialize)]
pub struct DeleteKeysParams {
    pub pattern: Option<String>,
}

pub async fn delete_keys(
    State(state): State<AppState>,
    Query(params): Query<DeleteKeysParams>,
) -> Response {
    let Some(pattern) = params.pattern.filter(|p| !p.is_empty()) else {
        return bad_request("query parameter 'pattern' is required");
    };
    if !KeyPattern::is_in_namespace(&pattern) {
        return bad_request(format!(
            "pattern must start with '{}'",
            KeyPattern::namespace().trim_end_matches('*')
        ));
    }

    let deleted = state.cache.cache.delete_pattern(&pattern).await;
    tracing::info!(pattern = %pattern, deleted, "cache keys deleted by admin");
    Json(json!({ "deleted": deleted })).into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}
