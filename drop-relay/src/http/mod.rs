//! HTTP endpoints for peerdrop-relay.
//!
//! Serves the signaling WebSocket plus health and metrics endpoints.

pub mod health;
mod metrics;

use crate::server::SignalRelay;
use crate::session::ws_handler;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the router with all endpoints.
pub fn build_router(relay: Arc<SignalRelay>) -> Router {
    let mut router = Router::new()
        .route(&relay.config().server.ws_path, get(ws_handler))
        .route("/health", get(health::health_handler));
    if relay.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }
    router.layer(Extension(relay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn test_relay(config: Config) -> Arc<SignalRelay> {
        Arc::new(SignalRelay::new(config).unwrap())
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = build_router(test_relay(Config::default()));
        assert_eq!(get_status(app, "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_ok() {
        let app = build_router(test_relay(Config::default()));
        assert_eq!(get_status(app, "/metrics").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_can_be_disabled() {
        let mut config = Config::default();
        config.http.metrics_enabled = false;
        let app = build_router(test_relay(config));
        assert_eq!(get_status(app, "/metrics").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn plain_get_on_websocket_path_is_rejected() {
        let app = build_router(test_relay(Config::default()));
        let status = get_status(app, "/ws").await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let app = build_router(test_relay(Config::default()));
        assert_eq!(get_status(app, "/nope").await, StatusCode::NOT_FOUND);
    }
}
