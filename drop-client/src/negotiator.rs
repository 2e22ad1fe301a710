//! Peer negotiator: executes the actions of the negotiation state machine.
//!
//! ```text
//! SignalingEvent / PeerEvent → NegotiationState::on_event → actions
//!                                                  ↓
//!                        PeerConnection + SignalingClient (I/O)
//! ```
//!
//! Each negotiation attempt gets a fresh peer connection and a new
//! generation number. A pump task forwards the connection's events tagged
//! with that generation, so events from an abandoned attempt can be told
//! apart and dropped by the session.

use std::collections::VecDeque;
use std::sync::Arc;

use peerdrop_core::{NegotiationAction, NegotiationEvent, NegotiationNotice, NegotiationState};
use peerdrop_types::DATA_CHANNEL_LABEL;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::signaling::SignalingClient;
use crate::transport::{PeerConnection, PeerEvent, PeerFactory, SignalingTransport, TransportError};

/// Channel type produced by a peer factory.
pub type ChannelOf<P> = <<P as PeerFactory>::Connection as PeerConnection>::Channel;

/// A peer event tagged with the attempt that produced it.
pub struct PeerEnvelope<C> {
    /// Negotiation attempt.
    pub generation: u64,
    /// The event.
    pub event: PeerEvent<C>,
}

/// Drives one negotiation attempt at a time.
pub struct Negotiator<P: PeerFactory> {
    factory: P,
    ice_servers: Vec<String>,
    state: NegotiationState,
    peer: Option<Arc<P::Connection>>,
    generation: u64,
}

impl<P: PeerFactory> Negotiator<P> {
    /// Create a negotiator in the idle state.
    pub fn new(factory: P, ice_servers: Vec<String>) -> Self {
        Self {
            factory,
            ice_servers,
            state: NegotiationState::new(),
            peer: None,
            generation: 0,
        }
    }

    /// Current state machine state.
    pub fn state(&self) -> &NegotiationState {
        &self.state
    }

    /// Generation of the current peer connection.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Feed one event and execute the resulting actions.
    ///
    /// Returns the notices emitted for the session, in order.
    pub async fn handle<S: SignalingTransport>(
        &mut self,
        event: NegotiationEvent,
        signaling: &SignalingClient<S>,
        peer_events: &mpsc::UnboundedSender<PeerEnvelope<ChannelOf<P>>>,
    ) -> Vec<NegotiationNotice> {
        let mut queue = VecDeque::from([event]);
        let mut notices = Vec::new();

        while let Some(event) = queue.pop_front() {
            let state = std::mem::take(&mut self.state);
            let before = state.phase();
            let (state, actions) = state.on_event(event);
            if state.phase() != before {
                debug!(from = before, to = state.phase(), "Negotiation transition");
            }
            self.state = state;

            for action in actions {
                match action {
                    NegotiationAction::EmitEvent(notice) => notices.push(notice),
                    action => {
                        if let Some(next) = self.execute(action, signaling, peer_events).await {
                            queue.push_back(next);
                        }
                    }
                }
            }
        }

        notices
    }

    async fn execute<S: SignalingTransport>(
        &mut self,
        action: NegotiationAction,
        signaling: &SignalingClient<S>,
        peer_events: &mpsc::UnboundedSender<PeerEnvelope<ChannelOf<P>>>,
    ) -> Option<NegotiationEvent> {
        match action {
            NegotiationAction::StartOffer => {
                match self.start_offer(signaling, peer_events).await {
                    Ok(()) => {
                        info!("Offer sent");
                        None
                    }
                    Err(e) => {
                        error!("Failed to start negotiation: {}", e);
                        Some(NegotiationEvent::CloseRequested)
                    }
                }
            }
            NegotiationAction::AcceptOffer(offer) => {
                let peer = match self.current_or_new_peer(peer_events).await {
                    Ok(peer) => peer,
                    Err(e) => {
                        warn!("Dropping offer, no peer connection: {}", e);
                        return None;
                    }
                };
                let answer = match peer.accept_offer(offer).await {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!("Dropping offer: {}", e);
                        return None;
                    }
                };
                if let Err(e) = signaling.send_answer(answer).await {
                    warn!("Failed to send answer: {}", e);
                }
                info!("Answer sent");
                Some(NegotiationEvent::RemoteDescriptionApplied)
            }
            NegotiationAction::ApplyAnswer(answer) => {
                let peer = self.peer.as_ref()?;
                match peer.apply_answer(answer).await {
                    Ok(()) => Some(NegotiationEvent::RemoteDescriptionApplied),
                    Err(e) => {
                        warn!("Dropping answer: {}", e);
                        None
                    }
                }
            }
            NegotiationAction::AddCandidates(candidates) => {
                let peer = self.peer.as_ref()?;
                for candidate in candidates {
                    if let Err(e) = peer.add_candidate(candidate).await {
                        warn!("Failed to add remote candidate: {}", e);
                    }
                }
                None
            }
            NegotiationAction::SendCandidate(candidate) => {
                if let Err(e) = signaling.send_candidate(candidate).await {
                    warn!("Failed to forward local candidate: {}", e);
                }
                None
            }
            NegotiationAction::ClosePeer => {
                if let Some(peer) = self.peer.take() {
                    peer.close().await;
                }
                None
            }
            NegotiationAction::Discard { reason } => {
                warn!("Dropping negotiation payload: {}", reason);
                None
            }
            NegotiationAction::EmitEvent(_) => None,
        }
    }

    async fn start_offer<S: SignalingTransport>(
        &mut self,
        signaling: &SignalingClient<S>,
        peer_events: &mpsc::UnboundedSender<PeerEnvelope<ChannelOf<P>>>,
    ) -> Result<(), TransportError> {
        if let Some(stale) = self.peer.take() {
            stale.close().await;
        }
        let peer = self.new_peer(peer_events).await?;
        let offer = peer.create_offer(DATA_CHANNEL_LABEL).await?;
        signaling.send_offer(offer).await
    }

    async fn current_or_new_peer(
        &mut self,
        peer_events: &mpsc::UnboundedSender<PeerEnvelope<ChannelOf<P>>>,
    ) -> Result<Arc<P::Connection>, TransportError> {
        match &self.peer {
            Some(peer) => Ok(Arc::clone(peer)),
            None => self.new_peer(peer_events).await,
        }
    }

    async fn new_peer(
        &mut self,
        peer_events: &mpsc::UnboundedSender<PeerEnvelope<ChannelOf<P>>>,
    ) -> Result<Arc<P::Connection>, TransportError> {
        let peer = Arc::new(self.factory.create(&self.ice_servers).await?);
        self.generation += 1;
        self.peer = Some(Arc::clone(&peer));

        let generation = self.generation;
        let pump = Arc::clone(&peer);
        let events = peer_events.clone();
        tokio::spawn(async move {
            loop {
                let event = pump.next_event().await.unwrap_or(PeerEvent::Closed);
                let last = matches!(event, PeerEvent::Closed);
                if events.send(PeerEnvelope { generation, event }).is_err() || last {
                    break;
                }
            }
        });

        debug!(generation, "Peer connection created");
        Ok(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockChannel, MockPeerNetwork, MockRelay, MockSignaling};
    use peerdrop_types::{IceCandidate, SessionDescription, SignalMessage};

    struct Harness {
        network: MockPeerNetwork,
        signaling: MockSignaling,
        client: SignalingClient<MockSignaling>,
        negotiator: Negotiator<MockPeerNetwork>,
        peer_tx: mpsc::UnboundedSender<PeerEnvelope<MockChannel>>,
        peer_rx: mpsc::UnboundedReceiver<PeerEnvelope<MockChannel>>,
    }

    fn harness() -> Harness {
        let relay = MockRelay::new();
        let network = MockPeerNetwork::new();
        let signaling = relay.connect();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        Harness {
            negotiator: Negotiator::new(network.clone(), vec![]),
            client: SignalingClient::new(signaling.clone()),
            network,
            signaling,
            peer_tx,
            peer_rx,
        }
    }

    impl Harness {
        async fn feed(&mut self, event: NegotiationEvent) -> Vec<NegotiationNotice> {
            self.negotiator
                .handle(event, &self.client, &self.peer_tx)
                .await
        }

        fn sent_kinds(&self) -> Vec<String> {
            self.signaling
                .sent_messages()
                .iter()
                .filter_map(|text| SignalMessage::from_json(text).ok())
                .map(|m| m.kind().to_string())
                .collect()
        }
    }

    fn candidate(n: u8) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n} 1 udp 1 10.0.0.{n} 5000 typ host"))
    }

    #[tokio::test]
    async fn initiator_sends_offer() {
        let mut h = harness();
        let notices = h.feed(NegotiationEvent::PeerReady { initiator: true }).await;

        assert!(notices.is_empty());
        assert!(h.negotiator.state().is_negotiating());
        assert_eq!(h.negotiator.generation(), 1);
        assert_eq!(h.sent_kinds(), vec!["offer"]);
    }

    #[tokio::test]
    async fn offer_failure_closes_attempt() {
        let mut h = harness();
        h.network.fail_next_create("no ice servers");
        let notices = h.feed(NegotiationEvent::PeerReady { initiator: true }).await;

        assert_eq!(*h.negotiator.state(), NegotiationState::Closed);
        assert!(matches!(notices[0], NegotiationNotice::Closed { .. }));
        assert!(h.sent_kinds().is_empty());
    }

    #[tokio::test]
    async fn early_candidates_are_replayed_after_offer() {
        let mut h = harness();
        h.feed(NegotiationEvent::RemoteCandidate(candidate(1))).await;
        h.feed(NegotiationEvent::RemoteCandidate(candidate(2))).await;

        let offerer = h.network.create(&[]).await.unwrap();
        let offer = offerer.create_offer("file").await.unwrap();
        h.feed(NegotiationEvent::RemoteOffer(offer)).await;

        let answerer = &h.network.connections()[1];
        assert_eq!(answerer.added_candidates(), vec![candidate(1), candidate(2)]);
        assert_eq!(h.sent_kinds(), vec!["answer"]);
        assert_eq!(h.negotiator.state().pending_candidates(), 0);
    }

    #[tokio::test]
    async fn malformed_offer_keeps_attempt_alive() {
        let mut h = harness();
        h.feed(NegotiationEvent::RemoteOffer(SessionDescription::offer("garbage")))
            .await;

        assert!(h.negotiator.state().is_negotiating());
        assert!(h.sent_kinds().is_empty());
    }

    #[tokio::test]
    async fn local_candidates_are_forwarded() {
        let mut h = harness();
        h.feed(NegotiationEvent::PeerReady { initiator: true }).await;

        let envelope = h.peer_rx.recv().await.unwrap();
        assert_eq!(envelope.generation, 1);
        let PeerEvent::LocalCandidate(local) = envelope.event else {
            panic!("Expected LocalCandidate");
        };
        h.feed(NegotiationEvent::LocalCandidate(local)).await;
        assert_eq!(h.sent_kinds(), vec!["offer", "candidate"]);
    }

    #[tokio::test]
    async fn peer_gone_closes_connection() {
        let mut h = harness();
        h.feed(NegotiationEvent::PeerReady { initiator: true }).await;
        let notices = h.feed(NegotiationEvent::PeerGone).await;

        assert!(matches!(
            &notices[0],
            NegotiationNotice::Closed { reason } if reason == "peer disconnected"
        ));
        assert!(h.network.connections()[0].is_closed());
    }

    #[tokio::test]
    async fn new_attempt_gets_new_generation() {
        let mut h = harness();
        h.feed(NegotiationEvent::PeerReady { initiator: true }).await;
        h.feed(NegotiationEvent::PeerGone).await;
        h.feed(NegotiationEvent::PeerReady { initiator: true }).await;

        assert_eq!(h.negotiator.generation(), 2);
        assert_eq!(h.network.connections().len(), 2);
    }
}
