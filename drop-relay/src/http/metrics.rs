//! Prometheus metrics endpoint.

use crate::server::SignalRelay;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
pub async fn metrics_handler(Extension(relay): Extension<Arc<SignalRelay>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&relay),
    )
}

/// Render gauges (current state) and counters (monotonic since startup).
fn render(relay: &SignalRelay) -> String {
    let m = relay.metrics();

    let clients = relay.client_count();
    let waiting = relay.waiting_count();
    let pairs = relay.pair_count();

    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let messages = m.messages_total.load(Ordering::Relaxed);
    let registrations = m.registrations_total.load(Ordering::Relaxed);
    let pairings = m.pairings_total.load(Ordering::Relaxed);
    let forwarded = m.forwarded_total.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    format!(
        r#"# HELP peerdrop_relay_clients_active Number of connected clients
# TYPE peerdrop_relay_clients_active gauge
peerdrop_relay_clients_active {clients}

# HELP peerdrop_relay_waiting_active Number of rendezvous ids waiting for a peer
# TYPE peerdrop_relay_waiting_active gauge
peerdrop_relay_waiting_active {waiting}

# HELP peerdrop_relay_pairs_active Number of active pairings
# TYPE peerdrop_relay_pairs_active gauge
peerdrop_relay_pairs_active {pairs}

# HELP peerdrop_relay_info Server information
# TYPE peerdrop_relay_info gauge
peerdrop_relay_info{{version="{version}"}} 1

# HELP peerdrop_relay_connections_total Total connections accepted
# TYPE peerdrop_relay_connections_total counter
peerdrop_relay_connections_total {conns_total}

# HELP peerdrop_relay_messages_total Total signaling messages received
# TYPE peerdrop_relay_messages_total counter
peerdrop_relay_messages_total {messages}

# HELP peerdrop_relay_registrations_total Total rendezvous ids issued
# TYPE peerdrop_relay_registrations_total counter
peerdrop_relay_registrations_total {registrations}

# HELP peerdrop_relay_pairings_total Total successful pairings
# TYPE peerdrop_relay_pairings_total counter
peerdrop_relay_pairings_total {pairings}

# HELP peerdrop_relay_forwarded_total Total negotiation payloads forwarded
# TYPE peerdrop_relay_forwarded_total counter
peerdrop_relay_forwarded_total {forwarded}

# HELP peerdrop_relay_rate_limit_hits_total Total rate limit rejections
# TYPE peerdrop_relay_rate_limit_hits_total counter
peerdrop_relay_rate_limit_hits_total {rate_limits}

# HELP peerdrop_relay_errors_total Total protocol errors
# TYPE peerdrop_relay_errors_total counter
peerdrop_relay_errors_total {errors}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}
