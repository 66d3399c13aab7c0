//! Cache-aside for JSON responses.
//!
//! On a hit the handler is skipped and the cached body is served with
//! `X-Cache: HIT` and the entry's remaining lifetime in `X-Cache-TTL`. On a miss the handler runs; a 2xx JSON body is stored in
//! the background and the response is passed through byte for byte with
//! `X-Cache: MISS`. Anything else is never cached.

use std::sync::Arc;

use axum::{
    Json,
    body::{Body, HttpBody},
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use guildhall_cache::{CacheCategory, CacheKey, CacheService, escape_glob};
use serde_json::Value;
use tracing::{debug, warn};

use super::RequestSnapshot;
use crate::config::ResponseCacheConfig;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_CACHE_KEY: HeaderName = HeaderName::from_static("x-cache-key");
pub const X_CACHE_TTL: HeaderName = HeaderName::from_static("x-cache-ttl");

type KeyFn = Arc<dyn Fn(&RequestSnapshot) -> Option<String> + Send + Sync>;
type Condition = Arc<dyn Fn(&RequestSnapshot) -> bool + Send + Sync>;

/// How the cache key is derived from a request.
#[derive(Clone)]
pub enum KeyStrategy {
    /// Same key for every request through this layer.
    Static(String),
    /// Computed per request; `None` skips caching.
    Computed(KeyFn),
}

impl KeyStrategy {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&RequestSnapshot) -> Option<String> + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(f))
    }

    /// Keys routes shaped `/{resource}[/{id}[/...]]` under the entity they
    /// read, so the default invalidation rules reach them:
    ///
    /// - `/clans/77/members` -> `v1:clan:77:route:/clans/77/members`
    /// - `/clans?page=1` -> `v1:clan:list:route:/clans%3Fpage=1`
    ///
    /// Glob characters in the path and query are percent-escaped. Requests
    /// whose id is not a valid key segment are not cached.
    pub fn per_route(category: CacheCategory) -> Self {
        Self::computed(move |req| {
            let id = req.segments().get(1).copied().unwrap_or("list");
            let key = CacheKey::new(category, id).ok()?;
            Some(key.route(&path_and_query(req)).to_string())
        })
    }

    /// `v1:session:{header value}:{path}[?{query}]`, glob characters escaped.
    /// Requests without the header are not cached.
    pub fn per_session(header_name: &'static str) -> Self {
        Self::computed(move |req| {
            let session = req.header(header_name)?;
            let key = CacheKey::session(session).ok()?;
            Some(key.with_suffix(escape_glob(&path_and_query(req))).to_string())
        })
    }

    pub fn resolve(&self, req: &RequestSnapshot) -> Option<String> {
        match self {
            Self::Static(key) => (!key.is_empty()).then(|| key.clone()),
            Self::Computed(f) => f(req),
        }
    }
}

fn path_and_query(req: &RequestSnapshot) -> String {
    match &req.query {
        Some(q) if !q.is_empty() => format!("{}?{q}", req.path),
        _ => req.path.clone(),
    }
}

/// Named TTL presets, resolved against [`ResponseCacheConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseTtl {
    /// Per-session data (default 900s)
    Session,
    /// Paginated lists (default 1800s)
    List,
    /// Entity aggregates (default 3600s)
    Aggregate,
    /// Statistics (default 120s)
    Stats,
}

impl ResponseTtl {
    pub fn secs(&self, config: &ResponseCacheConfig) -> u64 {
        match self {
            Self::Session => config.session_ttl_secs,
            Self::List => config.list_ttl_secs,
            Self::Aggregate => config.aggregate_ttl_secs,
            Self::Stats => config.stats_ttl_secs,
        }
    }
}

/// State for one [`cache_response`] layer.
#[derive(Clone)]
pub struct ResponseCache {
    cache: CacheService,
    key: KeyStrategy,
    ttl_secs: u64,
    condition: Condition,
    enabled: bool,
    max_body_bytes: usize,
}

impl ResponseCache {
    /// Cache GET responses under `key` for `ttl_secs`.
    pub fn new(cache: CacheService, key: KeyStrategy, ttl_secs: u64) -> Self {
        Self {
            cache,
            key,
            ttl_secs,
            condition: Arc::new(|req| req.method == Method::GET),
            enabled: true,
            max_body_bytes: 1024 * 1024,
        }
    }

    pub fn from_config(
        cache: CacheService,
        config: &ResponseCacheConfig,
        key: KeyStrategy,
        ttl: ResponseTtl,
    ) -> Self {
        Self::new(cache, key, ttl.secs(config))
            .enabled(config.enabled)
            .max_body_bytes(config.max_body_bytes)
    }

    /// Replace the default GET-only condition.
    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&RequestSnapshot) -> bool + Send + Sync + 'static,
    {
        self.condition = Arc::new(condition);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }
}

/// Middleware for response caching. Attach with
/// `axum::middleware::from_fn_with_state(response_cache, cache_response)`.
pub async fn cache_response(
    State(rc): State<ResponseCache>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !rc.enabled {
        return next.run(request).await;
    }

    let snapshot = RequestSnapshot::from_request(&request);
    if !(rc.condition)(&snapshot) {
        return next.run(request).await;
    }
    let Some(key) = rc.key.resolve(&snapshot) else {
        return next.run(request).await;
    };

    if let Some(cached) = rc.cache.get_json(&key).await {
        debug!(key = %key, outcome = "hit", "serving cached response");
        let remaining = match rc.cache.ttl(&key).await {
            secs if secs > 0 => secs as u64,
            _ => rc.ttl_secs,
        };
        let mut response = (StatusCode::OK, Json(cached)).into_response();
        tag(response.headers_mut(), "HIT", &key);
        response
            .headers_mut()
            .insert(X_CACHE_TTL, HeaderValue::from(remaining));
        return response;
    }

    debug!(key = %key, outcome = "miss", "cache miss, executing handler");
    let response = next.run(request).await;

    let cacheable = response.status().is_success()
        && is_json(response.headers())
        && response
            .body()
            .size_hint()
            .upper()
            .is_some_and(|len| len <= rc.max_body_bytes as u64);
    if !cacheable {
        let mut response = response;
        tag(response.headers_mut(), "MISS", &key);
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, rc.max_body_bytes).await {
        Ok(b) => b,
        Err(e) => {
            warn!(key = %key, error = %e, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => {
            let cache = rc.cache.clone();
            let ttl = rc.ttl_secs;
            let store_key = key.clone();
            tokio::spawn(async move {
                cache.set(&store_key, &value, Some(ttl)).await;
            });
        }
        Err(e) => debug!(key = %key, error = %e, "response body is not valid JSON, not caching"),
    }

    let mut response = Response::from_parts(parts, Body::from(bytes));
    tag(response.headers_mut(), "MISS", &key);
    response
}

fn tag(headers: &mut HeaderMap, outcome: &'static str, key: &str) {
    headers.insert(X_CACHE, HeaderValue::from_static(outcome));
    if let Ok(value) = HeaderValue::from_str(key) {
        headers.insert(X_CACHE_KEY, value);
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("application/json") || ct.contains("+json")
        })
}
