use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    middleware,
    routing::get,
};
use guildhall_cache::{CacheCategory, CacheContext};
use guildhall_server::{
    AppConfig, AppState, KeyStrategy, ResponseTtl, build_app, build_router, cache_response,
};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

async fn serve(app: Router) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("http://{addr}"), tx, server)
}

async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Clan detail route: cached reads, writes bump a version counter.
fn clan_routes(state: &AppState, version: Arc<AtomicU64>) -> Router<AppState> {
    let cached = state.response_cache(KeyStrategy::per_route(CacheCategory::Clan), ResponseTtl::Aggregate);
    let read_version = version.clone();

    Router::new()
        .route(
            "/clans/{id}",
            get(move |Path(id): Path<String>| {
                let version = read_version.clone();
                async move { Json(json!({ "id": id, "version": version.load(Ordering::SeqCst) })) }
            })
            .put(move || {
                let version = version.clone();
                async move {
                    version.fetch_add(1, Ordering::SeqCst);
                    StatusCode::NO_CONTENT
                }
            }),
        )
        .route_layer(middleware::from_fn_with_state(cached, cache_response))
}

#[tokio::test]
async fn server_endpoints_work() {
    guildhall_server::metrics::init_metrics();
    let app = build_app(&AppConfig::default()).await.expect("build app");
    let (base, shutdown_tx, handle) = serve(app).await;
    let client = reqwest::Client::new();

    // GET /healthz
    let resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(resp.status().is_success());
    assert!(resp.headers().contains_key("x-request-id"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // GET /readyz
    let resp = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["cache"]["healthy"], true);
    assert_eq!(body["cache"]["backend"], "memory");

    // GET /metrics
    let resp = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );

    // Request id is echoed when supplied
    let resp = client
        .get(format!("{base}/healthz"))
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "abc-123");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn readyz_stays_ready_when_cache_is_down() {
    let store = Arc::new(guildhall_cache::InMemoryStore::new());
    let config = AppConfig::default();
    let ctx = CacheContext::with_store(store.clone(), &config.engine());
    let state = AppState::new(Arc::new(ctx), config);
    let (base, shutdown_tx, handle) = serve(build_router(state, Router::new())).await;

    store.set_available(false);
    let body: Value = reqwest::get(format!("{base}/readyz"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["cache"]["healthy"], false);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn cached_route_is_invalidated_by_successful_write() {
    const KEY: &str = "v1:clan:7:route:/clans/7";
    let config = AppConfig::default();
    let state = AppState::connect(config).await;
    let version = Arc::new(AtomicU64::new(0));
    let routes = clan_routes(&state, version.clone());
    let (base, shutdown_tx, handle) = serve(build_router(state.clone(), routes)).await;
    let client = reqwest::Client::new();
    let cache = state.cache.cache.clone();

    // First read is a miss and populates the cache in the background
    let resp = client.get(format!("{base}/clans/7")).send().await.unwrap();
    assert_eq!(resp.headers()["x-cache"], "MISS");
    assert_eq!(resp.headers()["x-cache-key"], KEY);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["version"], 0);
    assert!(
        wait_until(|| {
            let cache = cache.clone();
            async move { cache.exists(KEY).await }
        })
        .await
    );

    // Second read is served from the cache
    let resp = client.get(format!("{base}/clans/7")).send().await.unwrap();
    assert_eq!(resp.headers()["x-cache"], "HIT");
    let remaining: u64 = resp.headers()["x-cache-ttl"].to_str().unwrap().parse().unwrap();
    assert!((3590..=3600).contains(&remaining));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "id": "7", "version": 0 }));

    // A successful write schedules clan.updated, which evicts the entry
    let resp = client.put(format!("{base}/clans/7")).send().await.unwrap();
    assert_eq!(resp.status(), 204);
    assert!(
        wait_until(|| {
            let cache = cache.clone();
            async move { !cache.exists(KEY).await }
        })
        .await
    );

    let resp = client.get(format!("{base}/clans/7")).send().await.unwrap();
    assert_eq!(resp.headers()["x-cache"], "MISS");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["version"], 1);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
    state.cache.shutdown();
}

#[tokio::test]
async fn admin_cache_endpoints() {
    let state = AppState::connect(AppConfig::default()).await;
    let cache = state.cache.cache.clone();
    let (base, shutdown_tx, handle) = serve(build_router(state.clone(), Router::new())).await;
    let client = reqwest::Client::new();

    cache.set("v1:clan:1", &json!({ "name": "a" }), None).await;
    cache.set("v1:clan:2", &json!({ "name": "b" }), None).await;
    cache.set("v1:user:1", &json!({ "name": "c" }), None).await;
    cache.get_json("v1:clan:1").await;
    cache.get_json("v1:clan:404").await;

    // Metrics snapshot
    let body: Value = client
        .get(format!("{base}/admin/cache/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["backend"], "memory");
    assert_eq!(body["cache"]["hits"], 1);
    assert_eq!(body["cache"]["misses"], 1);
    assert_eq!(body["cache"]["sets"], 3);

    // Reset
    let resp = client
        .post(format!("{base}/admin/cache/metrics/reset"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    assert_eq!(cache.metrics().hits, 0);

    // Pattern deletion requires an in-namespace pattern
    let resp = client
        .delete(format!("{base}/admin/cache/keys"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let resp = client
        .delete(format!("{base}/admin/cache/keys?pattern=other:*"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let body: Value = client
        .delete(format!("{base}/admin/cache/keys?pattern=v1:clan:*"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["deleted"], 2);
    assert!(cache.exists("v1:user:1").await);

    // Full flush
    let body: Value = client
        .delete(format!("{base}/admin/cache"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["cleared"], true);
    assert!(!cache.exists("v1:user:1").await);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
    state.cache.shutdown();
}
