use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::get,
};
use guildhall_cache::CacheContext;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    admin,
    config::{AppConfig, ResponseCacheConfig},
    handlers,
    metrics::metrics_handler,
    middleware::{self as app_middleware, InvalidateOnSuccess, KeyStrategy, ResponseCache, ResponseTtl},
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheContext>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn connect(config: AppConfig) -> Self {
        let cache = CacheContext::connect(&config.engine()).await;
        Self::new(Arc::new(cache), config)
    }

    pub fn new(cache: Arc<CacheContext>, config: AppConfig) -> Self {
        Self {
            cache,
            config: Arc::new(config),
        }
    }

    /// Response cache state for a route, honoring `[response_cache]`.
    pub fn response_cache(&self, key: KeyStrategy, ttl: ResponseTtl) -> ResponseCache {
        ResponseCache::from_config(self.cache.cache.clone(), self.response_cache_config(), key, ttl)
    }

    pub fn response_cache_config(&self) -> &ResponseCacheConfig {
        &self.config.response_cache
    }
}

/// Assemble the router: health, metrics and admin endpoints plus any domain
/// `routes`. Successful writes on `routes` schedule REST-derived invalidations.
pub fn build_router(state: AppState, routes: Router<AppState>) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    let invalidation = InvalidateOnSuccess::rest(state.cache.queue.clone());

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(metrics_handler))
        .merge(admin::admin_routes())
        .merge(routes.layer(middleware::from_fn_with_state(
            invalidation,
            app_middleware::invalidate_on_success,
        )))
        // Middleware stack (order: request id -> trace -> cors -> body limit)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(app_middleware::request_id))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<_>| {
                            use tracing::field::Empty;
                            let req_id = req
                                .extensions()
                                .get::<app_middleware::RequestId>()
                                .map(|id| id.as_str().to_string())
                                .unwrap_or_default();
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri(),
                                http.status_code = Empty,
                                request_id = %req_id
                            )
                        })
                        .on_response(
                            |res: &axum::http::Response<_>,
                             latency: std::time::Duration,
                             span: &tracing::Span| {
                                span.record("http.status_code", tracing::field::display(res.status().as_u16()));
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            },
                        ),
                )
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

/// Connect the cache and build the router with no domain routes.
pub async fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    cfg.validate().map_err(anyhow::Error::msg)?;
    let state = AppState::connect(cfg.clone()).await;
    Ok(build_router(state, Router::new()))
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    routes: Router<AppState>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            routes: Router::new(),
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Domain routes served alongside the built-in endpoints.
    pub fn with_routes(mut self, routes: Router<AppState>) -> Self {
        self.routes = routes;
        self
    }

    pub async fn build(self) -> anyhow::Result<GuildhallServer> {
        self.config.validate().map_err(anyhow::Error::msg)?;
        let state = AppState::connect(self.config).await;
        let cache = state.cache.clone();
        let app = build_router(state, self.routes);

        Ok(GuildhallServer {
            addr: self.addr,
            app,
            cache,
        })
    }
}

pub struct GuildhallServer {
    addr: SocketAddr,
    app: Router,
    cache: Arc<CacheContext>,
}

impl GuildhallServer {
    pub fn cache(&self) -> &Arc<CacheContext> {
        &self.cache
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!(backend = self.cache.backend(), "listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        self.cache.shutdown();
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
