//! Health check endpoint.

use crate::server::SignalRelay;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Number of connected clients.
    pub clients: usize,
    /// Number of rendezvous ids waiting for a peer.
    pub waiting: usize,
    /// Number of active pairings.
    pub pairs: usize,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

impl HealthStatus {
    /// Snapshot the relay state.
    pub fn of(relay: &SignalRelay) -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            clients: relay.client_count(),
            waiting: relay.waiting_count(),
            pairs: relay.pair_count(),
            uptime_seconds: relay.uptime().as_secs(),
        }
    }
}

/// Health check handler.
pub async fn health_handler(Extension(relay): Extension<Arc<SignalRelay>>) -> Json<HealthStatus> {
    Json(HealthStatus::of(&relay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn health_status_serializes() {
        let status = HealthStatus {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            clients: 42,
            waiting: 3,
            pairs: 15,
            uptime_seconds: 3600,
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"clients\":42"));
        assert!(json.contains("\"pairs\":15"));
    }

    #[test]
    fn health_reflects_relay_state() {
        let relay = SignalRelay::new(Config::default()).unwrap();
        let (client, _rx) = relay.attach();
        relay.handle_text(client, r#"{"type":"register"}"#);

        let status = HealthStatus::of(&relay);
        assert_eq!(status.clients, 1);
        assert_eq!(status.waiting, 1);
        assert_eq!(status.pairs, 0);
    }
}
