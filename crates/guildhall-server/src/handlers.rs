use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use guildhall_cache::CacheHealth;
use serde::Serialize;

use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    cache: CacheHealth,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Always ready: a down cache is reported, not fatal.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let cache = state.cache.cache.health().await;
    if !cache.healthy {
        tracing::warn!(backend = cache.backend, error = ?cache.error, "cache not healthy");
    }
    (
        StatusCode::OK,
        Json(ReadyResponse {
            status: "ready",
            cache,
        }),
    )
}
