//! HTTP endpoints for courier-relay.
//!
//! Provides health checks, metrics, and the admin surface for message
//! deletion and account removal.

mod admin;
pub mod health;
mod metrics;

use crate::server::Relay;
use axum::routing::{delete, get, post};
use axum::{Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
///
/// The metrics route is omitted when disabled in config.
pub fn build_router(relay: Arc<Relay>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health::health_handler))
        .route("/messages/delete", post(admin::delete_messages_handler))
        .route("/accounts/:identity", delete(admin::delete_account_handler));

    if relay.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router.layer(Extension(relay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AllowAll;
    use crate::config::Config;
    use crate::storage::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn test_relay() -> Arc<Relay> {
        Arc::new(Relay::new(
            Config::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(AllowAll),
        ))
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = build_router(test_relay());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_ok() {
        let app = build_router(test_relay());

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_can_be_disabled() {
        let mut config = Config::default();
        config.http.metrics_enabled = false;
        let relay = Arc::new(Relay::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(AllowAll),
        ));
        let app = build_router(relay);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = build_router(test_relay());

        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
