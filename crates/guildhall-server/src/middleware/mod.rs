//! HTTP middleware.
//!
//! - [`response_cache`]: cache-aside for JSON GET responses
//! - [`invalidation`]: enqueue invalidation events after successful writes
//! - [`request_id`]: propagate or mint `x-request-id` as a [`RequestId`]

pub mod invalidation;
pub mod response_cache;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub use invalidation::{InvalidateOnSuccess, invalidate_on_success};
pub use response_cache::{KeyStrategy, ResponseCache, ResponseTtl, cache_response};

/// The parts of a request that key strategies and event mappers look at.
///
/// Taken before the handler runs, since the request is consumed by it.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub path: String,
    /// Route template (e.g. `/clans/{id}`) when the middleware runs after routing.
    pub matched_path: Option<String>,
    pub query: Option<String>,
    pub headers: HeaderMap,
}

impl RequestSnapshot {
    pub fn from_request(req: &Request<Body>) -> Self {
        Self {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            matched_path: req
                .extensions()
                .get::<MatchedPath>()
                .map(|p| p.as_str().to_string()),
            query: req.uri().query().map(str::to_string),
            headers: req.headers().clone(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Path segments without empty parts, e.g. `["clans", "77"]`.
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }
}

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Correlation id of the current request, stored in request extensions.
#[derive(Debug, Clone)]
pub struct RequestId(HeaderValue);

impl RequestId {
    pub fn as_str(&self) -> &str {
        self.0.to_str().unwrap_or_default()
    }
}

/// Keep the caller's `x-request-id` or mint a UUIDv4 and echo it back.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let id = req
        .headers()
        .get(&X_REQUEST_ID)
        .filter(|v| !v.is_empty())
        .cloned()
        .or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok());
    let Some(id) = id else {
        return next.run(req).await;
    };

    req.extensions_mut().insert(RequestId(id.clone()));
    let mut res = next.run(req).await;
    res.headers_mut().insert(X_REQUEST_ID, id);
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::{Extension, Router, routing::get};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/",
                get(|Extension(id): Extension<RequestId>| async move { id.as_str().to_string() }),
            )
            .layer(axum::middleware::from_fn(request_id))
    }

    #[tokio::test]
    async fn test_request_id_is_echoed_or_minted() {
        let req = Request::builder()
            .uri("/")
            .header(X_REQUEST_ID, "abc-123")
            .body(Body::empty())
            .unwrap();
        let res = app().oneshot(req).await.unwrap();
        assert_eq!(res.headers()[X_REQUEST_ID], "abc-123");
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"abc-123");

        let req = Request::builder().uri("/").header(X_REQUEST_ID, "").body(Body::empty()).unwrap();
        let res = app().oneshot(req).await.unwrap();
        let minted = res.headers()[X_REQUEST_ID].to_str().unwrap().to_string();
        assert!(Uuid::parse_str(&minted).is_ok());
    }
}
