//! `/metrics` in Prometheus text format.
//!
//! `guildhall-cache` records hits, misses, errors and invalidations through
//! the `metrics` facade. Nothing is exported until [`init_metrics`] installs
//! the Prometheus recorder; the server renders it on scrape, there is no push
//! gateway or listener of its own.

use std::sync::OnceLock;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the recorder. True for the call that installed it.
pub fn init_metrics() -> bool {
    if RECORDER.get().is_some() {
        return false;
    }
    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "prometheus recorder not installed");
            return false;
        }
    };
    let installed = RECORDER.set(handle).is_ok();
    if installed {
        tracing::info!("prometheus recorder installed");
    }
    installed
}

/// Current exposition text, `None` before [`init_metrics`].
pub fn render_metrics() -> Option<String> {
    RECORDER.get().map(PrometheusHandle::render)
}

pub async fn metrics_handler() -> Response {
    let Some(body) = render_metrics() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response();
    };
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use guildhall_cache::{CacheConfig, CacheService, InMemoryStore};

    #[tokio::test]
    async fn test_cache_counters_are_exported() {
        init_metrics();
        assert!(!init_metrics());

        let cache = CacheService::new(Arc::new(InMemoryStore::new()), &CacheConfig::default());
        assert_eq!(cache.get_json("v1:clan:404").await, None);

        let body = render_metrics().expect("recorder installed");
        assert!(body.contains("cache_misses_total"));

        let res = metrics_handler().await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], CONTENT_TYPE);
    }
}
