pub mod admin;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::{AppConfig, LoggingConfig, ResponseCacheConfig, ServerConfig};
pub use middleware::{
    InvalidateOnSuccess, KeyStrategy, RequestId, RequestSnapshot, ResponseCache, ResponseTtl,
    cache_response, invalidate_on_success,
};
pub use observability::init_tracing;
pub use server::{AppState, GuildhallServer, ServerBuilder, build_app, build_router};
