//! Invalidate after successful writes without delaying the response.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request},
    middleware::Next,
    response::Response,
};
use guildhall_cache::{InvalidationEvent, InvalidationQueue};

use super::RequestSnapshot;

type EventMapper = Arc<dyn Fn(&RequestSnapshot) -> Option<InvalidationEvent> + Send + Sync>;

/// State for [`invalidate_on_success`].
#[derive(Clone)]
pub struct InvalidateOnSuccess {
    queue: InvalidationQueue,
    mapper: EventMapper,
}

impl InvalidateOnSuccess {
    pub fn new<F>(queue: InvalidationQueue, mapper: F) -> Self
    where
        F: Fn(&RequestSnapshot) -> Option<InvalidationEvent> + Send + Sync + 'static,
    {
        Self {
            queue,
            mapper: Arc::new(mapper),
        }
    }

    /// Use [`rest_event`] as the mapper.
    pub fn rest(queue: InvalidationQueue) -> Self {
        Self::new(queue, rest_event)
    }
}

/// Middleware that enqueues the mapped event after a 2xx response.
pub async fn invalidate_on_success(
    State(state): State<InvalidateOnSuccess>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let snapshot = RequestSnapshot::from_request(&request);
    let response = next.run(request).await;

    if response.status().is_success()
        && let Some(event) = (state.mapper)(&snapshot)
    {
        tracing::debug!(event = %event.name(), path = %snapshot.path, "scheduling invalidation");
        state.queue.enqueue(event);
    }
    response
}

/// Map mutating requests on `/{users|clans|federations|missions}/{id}[/...]`
/// to the matching update event. A write under `/clans/{id}/members` or
/// `/federations/{id}/clans` is a membership change.
pub fn rest_event(req: &RequestSnapshot) -> Option<InvalidationEvent> {
    if !matches!(req.method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE) {
        return None;
    }
    let segments = req.segments();
    let (resource, id, rest) = match segments.as_slice() {
        [resource, id, rest @ ..] => (*resource, id.to_string(), rest),
        _ => return None,
    };
    let deleting = req.method == Method::DELETE && rest.is_empty();

    let event = match (resource, rest) {
        ("users", _) if deleting => InvalidationEvent::UserDeleted { user_id: id },
        ("users", _) => InvalidationEvent::UserUpdated { user_id: id },
        ("clans", ["members", user_id, ..]) => InvalidationEvent::ClanMembershipChanged {
            clan_id: id,
            user_id: user_id.to_string(),
        },
        ("clans", _) if deleting => InvalidationEvent::ClanDeleted { clan_id: id },
        ("clans", _) => InvalidationEvent::ClanUpdated { clan_id: id },
        ("federations", ["clans", clan_id, ..]) => InvalidationEvent::FederationMembershipChanged {
            federation_id: id,
            clan_id: clan_id.to_string(),
        },
        ("federations", _) => InvalidationEvent::FederationUpdated { federation_id: id },
        ("missions", _) => InvalidationEvent::MissionUpdated {
            mission_id: id,
            clan_id: None,
        },
        _ => return None,
    };
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::{Router, middleware, routing::post};
    use guildhall_cache::{CacheConfig, CacheService, InMemoryStore, InvalidationEngine};
    use tower::ServiceExt;

    fn snapshot(method: Method, path: &str) -> RequestSnapshot {
        RequestSnapshot {
            method,
            path: path.into(),
            matched_path: None,
            query: None,
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn test_rest_event_mapping() {
        assert_eq!(rest_event(&snapshot(Method::GET, "/clans/7")), None);
        assert_eq!(
            rest_event(&snapshot(Method::PUT, "/clans/7")),
            Some(InvalidationEvent::clan_updated("7"))
        );
        assert_eq!(
            rest_event(&snapshot(Method::DELETE, "/clans/7")),
            Some(InvalidationEvent::ClanDeleted { clan_id: "7".into() })
        );
        assert_eq!(
            rest_event(&snapshot(Method::DELETE, "/clans/7/members/u1")),
            Some(InvalidationEvent::ClanMembershipChanged {
                clan_id: "7".into(),
                user_id: "u1".into()
            })
        );
        assert_eq!(
            rest_event(&snapshot(Method::POST, "/federations/3/clans/7")),
            Some(InvalidationEvent::FederationMembershipChanged {
                federation_id: "3".into(),
                clan_id: "7".into()
            })
        );
        assert_eq!(rest_event(&snapshot(Method::POST, "/clans")), None);
        assert_eq!(rest_event(&snapshot(Method::POST, "/guilds/1")), None);
    }

    #[tokio::test]
    async fn test_only_success_enqueues() {
        let cache = CacheService::new(Arc::new(InMemoryStore::new()), &CacheConfig::default());
        let engine = Arc::new(InvalidationEngine::with_default_rules(cache.clone()));
        let (queue, worker) = InvalidationQueue::start(engine, 16);
        cache.set("v1:clan:1", &1, None).await;
        cache.set("v1:clan:2", &1, None).await;

        let app = Router::new()
            .route("/clans/{id}", post(|| async { StatusCode::NO_CONTENT }))
            .route("/clans/{id}/fail", post(|| async { StatusCode::CONFLICT }))
            .layer(middleware::from_fn_with_state(
                InvalidateOnSuccess::rest(queue),
                invalidate_on_success,
            ));

        let req = |uri: &str| {
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .body(Body::empty())
                .unwrap()
        };
        let res = app.clone().oneshot(req("/clans/1")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        let res = app.oneshot(req("/clans/2/fail")).await.unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);

        // The router held the last queue handle; the worker drains and exits
        worker.await.unwrap();
        assert!(!cache.exists("v1:clan:1").await);
        assert!(cache.exists("v1:clan:2").await);
    }
}
