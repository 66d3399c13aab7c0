//! End-to-end invalidation through a `CacheContext` on the in-process store.

use guildhall_cache::{CacheCategory, CacheContext, CacheKey, EngineConfig, InvalidationEvent, KeyPattern};

#[tokio::test]
async fn test_invalidate_clan_removes_entity_members_and_lists() {
    let ctx = CacheContext::connect(&EngineConfig::default()).await;
    assert_eq!(ctx.backend(), "memory");

    let clan = CacheKey::clan("77").unwrap();
    let members = clan.clone().with_suffix("members");
    let page = CacheKey::clan("list").unwrap().with_suffix("p1_l10");
    assert_eq!(page.to_string(), "v1:clan:list:p1_l10");

    for key in [&clan, &members, &page] {
        assert!(ctx.cache.set(&key.to_string(), &serde_json::json!({"id": 77}), Some(300)).await);
    }
    ctx.cache.set("v1:clan:78", &1, None).await;

    assert_eq!(ctx.invalidation.invalidate_clan("77").await, 3);
    assert!(!ctx.cache.exists("v1:clan:77").await);
    assert!(!ctx.cache.exists("v1:clan:77:members").await);
    assert!(!ctx.cache.exists("v1:clan:list:p1_l10").await);
    assert!(ctx.cache.exists("v1:clan:78").await);
}

#[tokio::test]
async fn test_removed_count_matches_store_delta() {
    let ctx = CacheContext::connect(&EngineConfig::default()).await;
    for i in 0..25 {
        ctx.cache.set(&format!("v1:stats:clans:{i}"), &i, None).await;
    }
    ctx.cache.set("v1:stats:clans", &0, None).await;
    ctx.cache.set("v1:stats:users", &0, None).await;

    let event = InvalidationEvent::StatsChanged { scope: "clans".into() };
    assert_eq!(ctx.invalidation.invalidate(&event).await, 26);
    assert!(ctx.cache.exists("v1:stats:users").await);
    assert_eq!(ctx.cache.delete_pattern(&KeyPattern::category(CacheCategory::Stats)).await, 1);
}

#[tokio::test]
async fn test_queue_invalidates_off_the_caller_path() {
    let ctx = CacheContext::connect(&EngineConfig::default()).await;
    ctx.cache.set("v1:federation:3", &1, None).await;
    ctx.cache.set("v1:federation:3:clans", &1, None).await;

    assert!(ctx.queue.enqueue(InvalidationEvent::federation_updated("3")));

    let mut gone = false;
    for _ in 0..100 {
        if !ctx.cache.exists("v1:federation:3").await {
            gone = true;
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(gone, "queued invalidation never ran");
    assert!(!ctx.cache.exists("v1:federation:3:clans").await);
}

#[tokio::test]
async fn test_shutdown_stops_background_work() {
    let ctx = CacheContext::connect(&EngineConfig::default()).await;
    ctx.shutdown();
    // Primitives keep working after the tasks stop
    assert!(ctx.cache.set("v1:user:1", &1, None).await);
    assert_eq!(ctx.invalidation.invalidate_user("1").await, 1);
}
