//! Signaling relay coordination.
//!
//! `SignalRelay` owns the rendezvous tables:
//! - **clients**: outbound queue of every connected socket
//! - **waiting**: rendezvous id → client that registered it
//! - **pairs**: client → paired client (always stored both ways)
//!
//! Each socket task calls [`SignalRelay::handle_text`] for every incoming
//! frame; replies and forwarded envelopes go out through the target
//! client's queue.

use crate::config::{Config, ConfigError};
use crate::error::{ProtocolError, ProtocolResult};
use crate::limits::RateLimits;
use dashmap::DashMap;
use drop_types::{RelayEnvelope, RendezvousId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Relay-internal client identifier (one per socket).
pub type ClientId = u64;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total sockets accepted.
    pub connections_total: AtomicU64,
    /// Total frames received from clients.
    pub messages_total: AtomicU64,
    /// Total registrations handled.
    pub registrations_total: AtomicU64,
    /// Total successful pairings.
    pub pairings_total: AtomicU64,
    /// Total negotiation payloads forwarded.
    pub forwarded_total: AtomicU64,
    /// Total rate limit rejections.
    pub rate_limit_hits: AtomicU64,
    /// Total protocol errors replied.
    pub errors_total: AtomicU64,
}

/// Main relay server.
pub struct SignalRelay {
    config: Config,
    rate_limits: RateLimits,
    metrics: RelayMetrics,
    started: Instant,
    next_client: AtomicU64,
    clients: DashMap<ClientId, mpsc::UnboundedSender<String>>,
    waiting: DashMap<String, ClientId>,
    registrations: DashMap<ClientId, String>,
    pairs: DashMap<ClientId, ClientId>,
}

impl std::fmt::Debug for SignalRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalRelay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("clients", &self.clients.len())
            .field("waiting", &self.waiting.len())
            .finish_non_exhaustive()
    }
}

impl SignalRelay {
    /// Create a relay with the given config.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let rate_limits = RateLimits::new(&config.limits)?;
        Ok(Self {
            config,
            rate_limits,
            metrics: RelayMetrics::default(),
            started: Instant::now(),
            next_client: AtomicU64::new(1),
            clients: DashMap::new(),
            waiting: DashMap::new(),
            registrations: DashMap::new(),
            pairs: DashMap::new(),
        })
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Time since the relay started.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of rendezvous ids waiting for a peer.
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Number of active pairings.
    pub fn pair_count(&self) -> usize {
        self.pairs.len() / 2
    }

    /// Add a client; frames for it arrive on the returned receiver.
    pub fn attach(&self) -> (ClientId, mpsc::UnboundedReceiver<String>) {
        let client = self.next_client.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.insert(client, tx);
        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(client, total = self.clients.len(), "Client attached");
        (client, rx)
    }

    /// Remove a client whose socket closed.
    pub fn detach(&self, client: ClientId) {
        self.cleanup(client);
        self.clients.remove(&client);
        self.rate_limits.shrink();
        tracing::debug!(client, total = self.clients.len(), "Client detached");
    }

    /// Handle one text frame from `client`.
    ///
    /// Protocol errors are replied to the client as `error` envelopes.
    pub fn handle_text(&self, client: ClientId, text: &str) {
        self.metrics.messages_total.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.dispatch(client, text) {
            match &e {
                ProtocolError::RateLimited => {
                    self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                }
                ProtocolError::UnknownType(kind) => {
                    tracing::debug!(client, kind = %kind, "Unknown message type");
                }
                _ => {}
            }
            tracing::debug!(client, "Replying error: {}", e);
            self.reply_error(client, &e);
        }
    }

    /// Send an `error` envelope to `client`.
    pub fn reply_error(&self, client: ClientId, error: &ProtocolError) {
        self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
        let reply = RelayEnvelope {
            kind: "error".into(),
            error: Some(error.to_string()),
            ..RelayEnvelope::default()
        };
        self.deliver(client, &reply);
    }

    fn dispatch(&self, client: ClientId, text: &str) -> ProtocolResult<()> {
        let limit = self.config.limits.max_message_size;
        if text.len() > limit {
            return Err(ProtocolError::MessageTooLarge {
                size: text.len(),
                limit,
            });
        }
        if let Err(e) = self.rate_limits.check_message(client) {
            tracing::warn!(client, "Rate limited: {}", e);
            return Err(ProtocolError::RateLimited);
        }

        let envelope = RelayEnvelope::from_json(text).map_err(|_| ProtocolError::InvalidJson)?;
        match envelope.kind.as_str() {
            "register" => {
                self.register(client);
                Ok(())
            }
            "connect" => self.connect(client, envelope.id),
            "offer" | "answer" | "candidate" => self.forward(client, envelope),
            "disconnect" => {
                tracing::info!(client, "Client disconnected from its peer");
                self.cleanup(client);
                Ok(())
            }
            _ => Err(ProtocolError::UnknownType(envelope.kind)),
        }
    }

    fn register(&self, client: ClientId) {
        let id = RendezvousId::generate().to_string();
        if let Some(previous) = self.registrations.insert(client, id.clone()) {
            self.waiting.remove(&previous);
        }
        self.waiting.insert(id.clone(), client);
        self.metrics
            .registrations_total
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(client, id = %id, "Registered");

        let reply = RelayEnvelope {
            kind: "registered".into(),
            id: Some(id),
            ..RelayEnvelope::default()
        };
        self.deliver(client, &reply);
    }

    fn connect(&self, client: ClientId, id: Option<String>) -> ProtocolResult<()> {
        let id = id.filter(|id| !id.is_empty()).ok_or(ProtocolError::MissingId)?;
        if self.waiting.get(&id).map(|target| *target) == Some(client) {
            return Err(ProtocolError::InvalidId);
        }
        let (_, target) = self.waiting.remove(&id).ok_or(ProtocolError::InvalidId)?;
        self.registrations.remove(&target);

        // A client is paired with at most one peer at a time
        self.unpair(client);
        self.unpair(target);

        self.pairs.insert(client, target);
        self.pairs.insert(target, client);
        self.metrics.pairings_total.fetch_add(1, Ordering::Relaxed);
        tracing::info!(client, target, "Paired");

        let connected = RelayEnvelope::bare("connected");
        self.deliver(client, &connected);
        self.deliver(target, &connected);
        Ok(())
    }

    fn forward(&self, client: ClientId, envelope: RelayEnvelope) -> ProtocolResult<()> {
        let peer = self
            .pairs
            .get(&client)
            .map(|peer| *peer)
            .ok_or(ProtocolError::NotPaired)?;

        let forward = RelayEnvelope {
            kind: envelope.kind,
            payload: envelope.payload,
            ..RelayEnvelope::default()
        };
        tracing::debug!(client, peer, kind = %forward.kind, "Forwarding");
        self.metrics.forwarded_total.fetch_add(1, Ordering::Relaxed);
        self.deliver(peer, &forward);
        Ok(())
    }

    fn cleanup(&self, client: ClientId) {
        if let Some((_, id)) = self.registrations.remove(&client) {
            self.waiting.remove(&id);
        }
        self.unpair(client);
    }

    fn unpair(&self, client: ClientId) {
        let Some((_, peer)) = self.pairs.remove(&client) else {
            return;
        };
        self.pairs.remove(&peer);
        tracing::info!(client, peer, "Pairing ended");
        self.deliver(peer, &RelayEnvelope::bare("disconnected"));
    }

    fn deliver(&self, client: ClientId, envelope: &RelayEnvelope) {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode envelope: {}", e);
                return;
            }
        };
        if let Some(tx) = self.clients.get(&client) {
            if tx.send(text).is_err() {
                tracing::debug!(client, "Client queue closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn relay() -> SignalRelay {
        SignalRelay::new(Config::default()).unwrap()
    }

    fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> RelayEnvelope {
        let text = rx.try_recv().expect("expected a frame");
        RelayEnvelope::from_json(&text).unwrap()
    }

    fn error_of(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        let env = next(rx);
        assert_eq!(env.kind, "error");
        env.error.unwrap()
    }

    fn register(
        relay: &SignalRelay,
        client: ClientId,
        rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> String {
        relay.handle_text(client, r#"{"type":"register"}"#);
        let env = next(rx);
        assert_eq!(env.kind, "registered");
        env.id.unwrap()
    }

    fn paired() -> (
        SignalRelay,
        (ClientId, mpsc::UnboundedReceiver<String>),
        (ClientId, mpsc::UnboundedReceiver<String>),
    ) {
        let relay = relay();
        let (a, mut rx_a) = relay.attach();
        let (b, mut rx_b) = relay.attach();
        let id = register(&relay, b, &mut rx_b);

        relay.handle_text(a, &json!({"type": "connect", "id": id}).to_string());
        assert_eq!(next(&mut rx_a).kind, "connected");
        assert_eq!(next(&mut rx_b).kind, "connected");
        (relay, (a, rx_a), (b, rx_b))
    }

    // ===========================================
    // Rendezvous
    // ===========================================

    #[test]
    fn register_assigns_uuid() {
        let relay = relay();
        let (client, mut rx) = relay.attach();
        let id = register(&relay, client, &mut rx);

        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert_eq!(relay.waiting_count(), 1);
    }

    #[test]
    fn register_again_replaces_id() {
        let relay = relay();
        let (client, mut rx) = relay.attach();
        let first = register(&relay, client, &mut rx);
        let second = register(&relay, client, &mut rx);

        assert_ne!(first, second);
        assert_eq!(relay.waiting_count(), 1);
    }

    #[test]
    fn connect_pairs_both_ways() {
        let (relay, _, _) = paired();
        assert_eq!(relay.pair_count(), 1);
        assert_eq!(relay.waiting_count(), 0);
    }

    #[test]
    fn connect_without_id_is_rejected() {
        let relay = relay();
        let (client, mut rx) = relay.attach();
        relay.handle_text(client, r#"{"type":"connect"}"#);
        assert_eq!(error_of(&mut rx), "missing id");

        relay.handle_text(client, r#"{"type":"connect","id":""}"#);
        assert_eq!(error_of(&mut rx), "missing id");
    }

    #[test]
    fn connect_to_unknown_id_is_rejected() {
        let relay = relay();
        let (client, mut rx) = relay.attach();
        relay.handle_text(client, r#"{"type":"connect","id":"nope"}"#);
        assert_eq!(error_of(&mut rx), "invalid ID");
    }

    #[test]
    fn connect_to_own_id_is_rejected() {
        let relay = relay();
        let (client, mut rx) = relay.attach();
        let id = register(&relay, client, &mut rx);

        relay.handle_text(client, &json!({"type": "connect", "id": id}).to_string());
        assert_eq!(error_of(&mut rx), "invalid ID");
        assert_eq!(relay.waiting_count(), 1);
    }

    #[test]
    fn rendezvous_id_is_single_use() {
        let relay = relay();
        let (a, mut rx_a) = relay.attach();
        let (b, mut rx_b) = relay.attach();
        let (c, mut rx_c) = relay.attach();
        let id = register(&relay, b, &mut rx_b);
        let connect = json!({"type": "connect", "id": id}).to_string();

        relay.handle_text(a, &connect);
        assert_eq!(next(&mut rx_a).kind, "connected");

        relay.handle_text(c, &connect);
        assert_eq!(error_of(&mut rx_c), "invalid ID");
        assert_eq!(relay.pair_count(), 1);
    }

    // ===========================================
    // Forwarding
    // ===========================================

    #[test]
    fn negotiation_payload_is_forwarded_verbatim() {
        let (relay, (a, _rx_a), (_, mut rx_b)) = paired();
        let payload = json!({"type": "offer", "sdp": "v=0\r\n"});
        relay.handle_text(a, &json!({"type": "offer", "payload": payload}).to_string());

        let env = next(&mut rx_b);
        assert_eq!(env.kind, "offer");
        assert_eq!(env.payload, Some(payload));
        assert!(env.id.is_none());
    }

    #[test]
    fn payload_from_unpaired_client_is_rejected() {
        let relay = relay();
        let (client, mut rx) = relay.attach();
        relay.handle_text(client, r#"{"type":"candidate","payload":{}}"#);
        assert_eq!(error_of(&mut rx), "not connected to a peer");
    }

    #[test]
    fn malformed_and_unknown_messages_are_rejected() {
        let relay = relay();
        let (client, mut rx) = relay.attach();

        relay.handle_text(client, "not json");
        assert_eq!(error_of(&mut rx), "invalid JSON");

        relay.handle_text(client, r#"{"type":"bogus"}"#);
        assert_eq!(error_of(&mut rx), "unknown message type");

        relay.handle_text(client, r#"{"id":"abc"}"#);
        assert_eq!(error_of(&mut rx), "unknown message type");
        assert_eq!(relay.metrics().errors_total.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut config = Config::default();
        config.limits.max_message_size = 32;
        let relay = SignalRelay::new(config).unwrap();
        let (client, mut rx) = relay.attach();

        let padded = json!({"type": "register", "pad": "x".repeat(64)}).to_string();
        relay.handle_text(client, &padded);
        assert_eq!(error_of(&mut rx), "message too large");
        assert_eq!(relay.waiting_count(), 0);
    }

    #[test]
    fn flooding_client_is_rate_limited() {
        let mut config = Config::default();
        config.limits.messages_per_second = 1;
        config.limits.message_burst = 2;
        let relay = SignalRelay::new(config).unwrap();
        let (client, mut rx) = relay.attach();

        register(&relay, client, &mut rx);
        register(&relay, client, &mut rx);
        relay.handle_text(client, r#"{"type":"register"}"#);
        assert_eq!(error_of(&mut rx), "rate limited");
        assert_eq!(relay.metrics().rate_limit_hits.load(Ordering::Relaxed), 1);
    }

    // ===========================================
    // Cleanup
    // ===========================================

    #[test]
    fn disconnect_notifies_peer_only() {
        let (relay, (a, mut rx_a), (_, mut rx_b)) = paired();
        relay.handle_text(a, r#"{"type":"disconnect"}"#);

        assert_eq!(next(&mut rx_b).kind, "disconnected");
        assert!(rx_a.try_recv().is_err());
        assert_eq!(relay.pair_count(), 0);
    }

    #[test]
    fn detach_cleans_up_everything() {
        let (relay, (a, _rx_a), (b, mut rx_b)) = paired();
        let (c, mut rx_c) = relay.attach();
        register(&relay, c, &mut rx_c);

        relay.detach(a);
        assert_eq!(next(&mut rx_b).kind, "disconnected");
        assert_eq!(relay.client_count(), 2);

        relay.detach(c);
        assert_eq!(relay.waiting_count(), 0);
        assert_eq!(relay.client_count(), 1);

        // The surviving client is no longer paired
        relay.handle_text(b, r#"{"type":"offer","payload":{}}"#);
        assert_eq!(error_of(&mut rx_b), "not connected to a peer");
    }

    #[test]
    fn pairing_again_ends_previous_pairing() {
        let (relay, (a, mut rx_a), (_, mut rx_b)) = paired();
        let (c, mut rx_c) = relay.attach();
        let id = register(&relay, c, &mut rx_c);

        relay.handle_text(a, &json!({"type": "connect", "id": id}).to_string());

        assert_eq!(next(&mut rx_b).kind, "disconnected");
        assert_eq!(next(&mut rx_a).kind, "connected");
        assert_eq!(next(&mut rx_c).kind, "connected");
        assert_eq!(relay.pair_count(), 1);
    }
}
