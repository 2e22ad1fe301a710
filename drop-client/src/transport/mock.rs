//! In-memory transports for testing.
//!
//! - [`MockRelay`] / [`MockSignaling`]: a relay that pairs clients exactly
//!   like the real one, without sockets
//! - [`MockPeerNetwork`] / [`MockPeerConnection`]: peer connections that
//!   pair through the offer they exchange
//! - [`MockChannel`]: an ordered channel pair with a real buffered-amount
//!   counter, so backpressure can be observed

use super::{PeerChannel, PeerConnection, PeerEvent, PeerFactory, SignalingTransport, TransportError};
use async_trait::async_trait;
use peerdrop_types::{Frame, IceCandidate, RelayEnvelope, RendezvousId, SessionDescription};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ===========================================
// Relay
// ===========================================

/// In-memory relay with the pairing rules of the real one.
#[derive(Debug, Clone, Default)]
pub struct MockRelay {
    inner: Arc<Mutex<RelayInner>>,
}

#[derive(Debug, Default)]
struct RelayInner {
    next_client: u64,
    clients: HashMap<u64, mpsc::UnboundedSender<String>>,
    waiting: HashMap<String, u64>,
    registrations: HashMap<u64, String>,
    pairs: HashMap<u64, u64>,
}

impl RelayInner {
    fn deliver(&self, client: u64, envelope: &RelayEnvelope) {
        if let (Some(tx), Ok(text)) = (self.clients.get(&client), envelope.to_json()) {
            let _ = tx.send(text);
        }
    }

    fn reply_error(&self, client: u64, reason: &str) {
        let envelope = RelayEnvelope {
            kind: "error".into(),
            error: Some(reason.into()),
            ..RelayEnvelope::default()
        };
        self.deliver(client, &envelope);
    }

    fn cleanup(&mut self, client: u64) {
        if let Some(id) = self.registrations.remove(&client) {
            self.waiting.remove(&id);
        }
        self.unpair(client);
    }

    fn unpair(&mut self, client: u64) {
        if let Some(peer) = self.pairs.remove(&client) {
            self.pairs.remove(&peer);
            self.deliver(peer, &RelayEnvelope::bare("disconnected"));
        }
    }
}

impl MockRelay {
    /// Create a new mock relay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a relay connection for one session.
    pub fn connect(&self) -> MockSignaling {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = {
            let mut inner = lock(&self.inner);
            inner.next_client += 1;
            let client = inner.next_client;
            inner.clients.insert(client, tx);
            client
        };
        MockSignaling {
            inner: Arc::new(SignalingInner {
                client,
                relay: self.clone(),
                inbox: tokio::sync::Mutex::new(rx),
                sent: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        lock(&self.inner).clients.len()
    }

    /// Number of active pairings (each pairing counted once).
    pub fn pair_count(&self) -> usize {
        lock(&self.inner).pairs.len() / 2
    }

    /// Drop every client connection, as if the relay went away.
    pub fn shutdown(&self) {
        let mut inner = lock(&self.inner);
        inner.clients.clear();
        inner.waiting.clear();
        inner.registrations.clear();
        inner.pairs.clear();
    }

    fn handle(&self, client: u64, text: &str) {
        let mut inner = lock(&self.inner);
        let envelope = match RelayEnvelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(_) => {
                inner.reply_error(client, "invalid JSON");
                return;
            }
        };

        match envelope.kind.as_str() {
            "register" => {
                let id = RendezvousId::generate().to_string();
                if let Some(previous) = inner.registrations.insert(client, id.clone()) {
                    inner.waiting.remove(&previous);
                }
                inner.waiting.insert(id.clone(), client);
                let reply = RelayEnvelope {
                    kind: "registered".into(),
                    id: Some(id),
                    ..RelayEnvelope::default()
                };
                inner.deliver(client, &reply);
            }
            "connect" => {
                let id = envelope.id.unwrap_or_default();
                if id.is_empty() {
                    inner.reply_error(client, "missing id");
                    return;
                }
                if inner.waiting.get(&id) == Some(&client) {
                    inner.reply_error(client, "invalid ID");
                    return;
                }
                let Some(target) = inner.waiting.remove(&id) else {
                    inner.reply_error(client, "invalid ID");
                    return;
                };
                inner.registrations.remove(&target);
                inner.unpair(client);
                inner.unpair(target);
                inner.pairs.insert(client, target);
                inner.pairs.insert(target, client);
                let connected = RelayEnvelope::bare("connected");
                inner.deliver(client, &connected);
                inner.deliver(target, &connected);
            }
            "offer" | "answer" | "candidate" => match inner.pairs.get(&client).copied() {
                Some(peer) => {
                    let forward = RelayEnvelope {
                        kind: envelope.kind,
                        payload: envelope.payload,
                        ..RelayEnvelope::default()
                    };
                    inner.deliver(peer, &forward);
                }
                None => inner.reply_error(client, "not connected to a peer"),
            },
            "disconnect" => inner.cleanup(client),
            _ => inner.reply_error(client, "unknown message type"),
        }
    }

    fn disconnect(&self, client: u64) {
        let mut inner = lock(&self.inner);
        inner.cleanup(client);
        inner.clients.remove(&client);
    }

    fn inject(&self, client: u64, text: &str) {
        if let Some(tx) = lock(&self.inner).clients.get(&client) {
            let _ = tx.send(text.to_string());
        }
    }
}

/// One session's connection to a [`MockRelay`].
#[derive(Debug, Clone)]
pub struct MockSignaling {
    inner: Arc<SignalingInner>,
}

#[derive(Debug)]
struct SignalingInner {
    client: u64,
    relay: MockRelay,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MockSignaling {
    /// Get all text frames that were sent to the relay.
    pub fn sent_messages(&self) -> Vec<String> {
        lock(&self.inner.sent).clone()
    }

    /// Deliver a raw text frame to this session, bypassing the relay logic.
    pub fn inject(&self, text: &str) {
        self.inner.relay.inject(self.inner.client, text);
    }
}

#[async_trait]
impl SignalingTransport for MockSignaling {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        lock(&self.inner.sent).push(text.clone());
        self.inner.relay.handle(self.inner.client, &text);
        Ok(())
    }

    async fn recv(&self) -> Result<Option<String>, TransportError> {
        let mut inbox = self.inner.inbox.lock().await;
        Ok(inbox.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.relay.disconnect(self.inner.client);
        }
        Ok(())
    }
}

// ===========================================
// Peer channel
// ===========================================

/// A frame as recorded by a [`MockChannel`] sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentFrame {
    /// Text frame with its content.
    Text(String),
    /// Binary frame with its length.
    Binary(usize),
}

/// One direction of a channel pair.
#[derive(Debug)]
struct Pipe {
    tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
    buffered: AtomicUsize,
    peak: AtomicUsize,
    low_water: AtomicUsize,
    drained: Notify,
    delivered: AtomicUsize,
    hold_after: Option<usize>,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    log: Mutex<Vec<SentFrame>>,
}

impl Pipe {
    fn new(hold_after: Option<usize>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            buffered: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            low_water: AtomicUsize::new(0),
            drained: Notify::new(),
            delivered: AtomicUsize::new(0),
            hold_after,
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            log: Mutex::new(Vec::new()),
        })
    }
}

#[derive(Debug, Default)]
struct Link {
    closed: AtomicBool,
    closed_notify: Notify,
}

impl Link {
    async fn wait_closed(&self) {
        loop {
            let notified = self.closed_notify.notified();
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/// Mock channel for testing - ordered in-memory delivery via mpsc.
///
/// Bytes count as buffered from the moment they are sent until the other
/// end receives them.
#[derive(Debug, Clone)]
pub struct MockChannel {
    outgoing: Arc<Pipe>,
    incoming: Arc<Pipe>,
    link: Arc<Link>,
}

impl MockChannel {
    /// Create a pair of connected mock channels.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_hold(None)
    }

    /// Create a pair whose second end stops delivering after `frames`
    /// frames until the channel closes.
    pub fn pair_with_hold(frames: Option<usize>) -> (Self, Self) {
        let a_to_b = Pipe::new(frames);
        let b_to_a = Pipe::new(None);
        let link = Arc::new(Link::default());
        let a = Self {
            outgoing: Arc::clone(&a_to_b),
            incoming: Arc::clone(&b_to_a),
            link: Arc::clone(&link),
        };
        let b = Self {
            outgoing: b_to_a,
            incoming: a_to_b,
            link,
        };
        (a, b)
    }

    /// Highest buffered amount observed on this end.
    pub fn peak_buffered(&self) -> usize {
        self.outgoing.peak.load(Ordering::SeqCst)
    }

    /// Every frame sent from this end, in order.
    pub fn sent_log(&self) -> Vec<SentFrame> {
        lock(&self.outgoing.log).clone()
    }

    /// Number of frames sent from this end.
    pub fn frames_sent(&self) -> usize {
        lock(&self.outgoing.log).len()
    }

    fn push(&self, frame: Frame) -> Result<(), TransportError> {
        if self.link.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        let tx = lock(&self.outgoing.tx);
        let tx = tx.as_ref().ok_or(TransportError::ChannelClosed)?;
        let len = frame.len();
        let record = match &frame {
            Frame::Text(text) => SentFrame::Text(text.clone()),
            Frame::Binary(data) => SentFrame::Binary(data.len()),
        };
        let now = self.outgoing.buffered.fetch_add(len, Ordering::SeqCst) + len;
        self.outgoing.peak.fetch_max(now, Ordering::SeqCst);
        self.outgoing
            .bytes_in
            .fetch_add(len as u64, Ordering::Relaxed);
        lock(&self.outgoing.log).push(record);
        tx.send(frame).map_err(|_| TransportError::ChannelClosed)
    }
}

#[async_trait]
impl PeerChannel for MockChannel {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.push(Frame::Text(text.to_string()))
    }

    async fn send_binary(&self, data: &[u8]) -> Result<(), TransportError> {
        self.push(Frame::Binary(data.to_vec()))
    }

    async fn buffered_amount(&self) -> usize {
        self.outgoing.buffered.load(Ordering::SeqCst)
    }

    async fn set_low_water_mark(&self, threshold: usize) {
        self.outgoing.low_water.store(threshold, Ordering::SeqCst);
    }

    async fn wait_drained(&self) -> Result<(), TransportError> {
        loop {
            let notified = self.outgoing.drained.notified();
            if self.link.closed.load(Ordering::SeqCst) {
                return Err(TransportError::ChannelClosed);
            }
            if self.outgoing.buffered.load(Ordering::SeqCst)
                <= self.outgoing.low_water.load(Ordering::SeqCst)
            {
                return Ok(());
            }
            notified.await;
        }
    }

    async fn recv(&self) -> Option<Frame> {
        let pipe = &self.incoming;
        if let Some(limit) = pipe.hold_after {
            if pipe.delivered.load(Ordering::SeqCst) >= limit {
                self.link.wait_closed().await;
                return None;
            }
        }

        let frame = {
            let mut rx = pipe.rx.lock().await;
            rx.recv().await?
        };
        if self.link.closed.load(Ordering::SeqCst) {
            return None;
        }

        let len = frame.len();
        pipe.delivered.fetch_add(1, Ordering::SeqCst);
        pipe.bytes_out.fetch_add(len as u64, Ordering::Relaxed);
        let left = pipe.buffered.fetch_sub(len, Ordering::SeqCst) - len;
        if left <= pipe.low_water.load(Ordering::SeqCst) {
            pipe.drained.notify_waiters();
        }
        Some(frame)
    }

    async fn close(&self) {
        if self.link.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.outgoing.tx).take();
        lock(&self.incoming.tx).take();
        self.outgoing.drained.notify_waiters();
        self.incoming.drained.notify_waiters();
        self.link.closed_notify.notify_waiters();
    }

    fn is_open(&self) -> bool {
        !self.link.closed.load(Ordering::SeqCst)
    }

    fn bytes_sent(&self) -> u64 {
        self.outgoing.bytes_in.load(Ordering::Relaxed)
    }

    fn bytes_received(&self) -> u64 {
        self.incoming.bytes_out.load(Ordering::Relaxed)
    }
}

// ===========================================
// Peer connections
// ===========================================

/// In-memory peer network; connections pair through the offer token.
#[derive(Debug, Clone, Default)]
pub struct MockPeerNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

#[derive(Debug, Default)]
struct NetworkInner {
    next_id: u64,
    offers: HashMap<u64, Arc<ConnInner>>,
    answered: HashMap<u64, (Arc<ConnInner>, MockChannel, MockChannel)>,
    connections: Vec<MockPeerConnection>,
    channels: Vec<(MockChannel, MockChannel)>,
    hold_after: Option<usize>,
    fail_next_create: Option<String>,
}

impl MockPeerNetwork {
    /// Create a new mock peer network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels opened from now on stop delivering initiator → responder
    /// frames after `frames` frames, until closed.
    pub fn hold_delivery_after(&self, frames: usize) {
        lock(&self.inner).hold_after = Some(frames);
    }

    /// Cause the next `create()` to fail with the given error.
    pub fn fail_next_create(&self, error: &str) {
        lock(&self.inner).fail_next_create = Some(error.to_string());
    }

    /// Every connection created so far, in creation order.
    pub fn connections(&self) -> Vec<MockPeerConnection> {
        lock(&self.inner).connections.clone()
    }

    /// Every opened channel pair as `(initiator end, responder end)`.
    pub fn channel_pairs(&self) -> Vec<(MockChannel, MockChannel)> {
        lock(&self.inner).channels.clone()
    }
}

#[async_trait]
impl PeerFactory for MockPeerNetwork {
    type Connection = MockPeerConnection;

    async fn create(&self, _ice_servers: &[String]) -> Result<MockPeerConnection, TransportError> {
        let mut inner = lock(&self.inner);
        if let Some(error) = inner.fail_next_create.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        inner.next_id += 1;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = MockPeerConnection {
            inner: Arc::new(ConnInner {
                id: inner.next_id,
                events_tx,
                events_rx: tokio::sync::Mutex::new(events_rx),
                state: Mutex::new(ConnState::default()),
            }),
            network: self.clone(),
        };
        inner.connections.push(connection.clone());
        Ok(connection)
    }
}

/// One in-memory peer connection.
#[derive(Debug, Clone)]
pub struct MockPeerConnection {
    inner: Arc<ConnInner>,
    network: MockPeerNetwork,
}

#[derive(Debug)]
struct ConnInner {
    id: u64,
    events_tx: mpsc::UnboundedSender<PeerEvent<MockChannel>>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PeerEvent<MockChannel>>>,
    state: Mutex<ConnState>,
}

#[derive(Debug, Default)]
struct ConnState {
    offer_token: Option<u64>,
    remote_applied: bool,
    channel: Option<MockChannel>,
    added: Vec<IceCandidate>,
    closed: bool,
}

impl ConnInner {
    fn emit(&self, event: PeerEvent<MockChannel>) {
        let _ = self.events_tx.send(event);
    }

    fn local_candidate(&self, role: &str) -> IceCandidate {
        IceCandidate {
            candidate: format!(
                "candidate:{} 1 udp 2122260223 10.0.0.{} 5000 typ host",
                role, self.id
            ),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }
    }
}

fn parse_token(sdp: &str, prefix: &str) -> Result<u64, TransportError> {
    sdp.strip_prefix(prefix)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| TransportError::Negotiation(format!("unrecognised description: {sdp}")))
}

impl MockPeerConnection {
    /// Remote candidates successfully added, in order.
    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        lock(&self.inner.state).added.clone()
    }

    /// True once `close()` was called.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    type Channel = MockChannel;

    async fn create_offer(&self, label: &str) -> Result<SessionDescription, TransportError> {
        let token = {
            let mut network = lock(&self.network.inner);
            network.next_id += 1;
            let token = network.next_id;
            network.offers.insert(token, Arc::clone(&self.inner));
            token
        };
        lock(&self.inner.state).offer_token = Some(token);
        self.inner
            .emit(PeerEvent::LocalCandidate(self.inner.local_candidate("offerer")));
        Ok(SessionDescription::offer(format!("mock-offer {token} {label}")))
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        let token = parse_token(&offer.sdp, "mock-offer ")?;
        {
            let mut network = lock(&self.network.inner);
            if network.offers.remove(&token).is_none() {
                return Err(TransportError::Negotiation(format!("unknown offer {token}")));
            }
            let (initiator_end, responder_end) = MockChannel::pair_with_hold(network.hold_after);
            network.answered.insert(
                token,
                (Arc::clone(&self.inner), initiator_end, responder_end),
            );
        }
        lock(&self.inner.state).remote_applied = true;
        self.inner
            .emit(PeerEvent::LocalCandidate(self.inner.local_candidate("answerer")));
        Ok(SessionDescription::answer(format!("mock-answer {token}")))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError> {
        let token = parse_token(&answer.sdp, "mock-answer ")?;
        if lock(&self.inner.state).offer_token != Some(token) {
            return Err(TransportError::Negotiation(format!(
                "answer {token} does not match our offer"
            )));
        }
        let (responder, initiator_end, responder_end) = {
            let mut network = lock(&self.network.inner);
            let entry = network
                .answered
                .remove(&token)
                .ok_or_else(|| TransportError::Negotiation(format!("offer {token} never answered")))?;
            network.channels.push((entry.1.clone(), entry.2.clone()));
            entry
        };

        {
            let mut state = lock(&self.inner.state);
            state.remote_applied = true;
            state.channel = Some(initiator_end.clone());
        }
        lock(&responder.state).channel = Some(responder_end.clone());

        self.inner.emit(PeerEvent::ChannelOpen(initiator_end));
        responder.emit(PeerEvent::ChannelOpen(responder_end));
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let mut state = lock(&self.inner.state);
        if !state.remote_applied {
            return Err(TransportError::Negotiation(
                "remote description not set".into(),
            ));
        }
        state.added.push(candidate);
        Ok(())
    }

    async fn next_event(&self) -> Option<PeerEvent<MockChannel>> {
        let mut events = self.inner.events_rx.lock().await;
        events.recv().await
    }

    async fn close(&self) {
        let channel = {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return;
            }
            state.closed = true;
            state.channel.take()
        };
        if let Some(channel) = channel {
            channel.close().await;
        }
        self.inner.emit(PeerEvent::Closed);
    }
}
