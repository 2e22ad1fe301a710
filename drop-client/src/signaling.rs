//! Signaling client: the session's single connection to the relay.
//!
//! Outgoing envelopes are sent directly; incoming envelopes are decoded by a
//! reader task and delivered as [`SignalingEvent`]s. A malformed envelope is
//! logged and skipped. Loss of the relay link ends the reader with
//! [`SignalingEvent::Closed`]; there is no reconnect.

use std::sync::Arc;

use peerdrop_types::{IceCandidate, RendezvousId, SessionDescription, SignalMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::transport::{SignalingTransport, TransportError};

/// Events observed on the relay connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// The relay assigned our rendezvous identifier.
    Registered(RendezvousId),
    /// The relay paired us with another session.
    PeerReady,
    /// The relay reports the pairing ended.
    PeerGone,
    /// Offer from the paired session.
    Offer(SessionDescription),
    /// Answer from the paired session.
    Answer(SessionDescription),
    /// Candidate from the paired session.
    Candidate(IceCandidate),
    /// The relay rejected a request.
    RelayError(String),
    /// The relay connection ended.
    Closed {
        /// Transport error that ended it, if any.
        reason: Option<String>,
    },
}

/// Map a decoded envelope to the event a device cares about.
///
/// Envelopes that only travel device → relay yield `None`.
pub fn classify(message: SignalMessage) -> Option<SignalingEvent> {
    match message {
        SignalMessage::Registered { id } => Some(SignalingEvent::Registered(id)),
        SignalMessage::Connected => Some(SignalingEvent::PeerReady),
        SignalMessage::Disconnected => Some(SignalingEvent::PeerGone),
        SignalMessage::Offer { payload } => Some(SignalingEvent::Offer(payload)),
        SignalMessage::Answer { payload } => Some(SignalingEvent::Answer(payload)),
        SignalMessage::Candidate { payload } => Some(SignalingEvent::Candidate(payload)),
        SignalMessage::Error { error } => Some(SignalingEvent::RelayError(error)),
        SignalMessage::Register | SignalMessage::Connect { .. } | SignalMessage::Disconnect => {
            None
        }
    }
}

/// Owns the relay connection of one session.
pub struct SignalingClient<S: SignalingTransport> {
    transport: Arc<S>,
}

impl<S: SignalingTransport> Clone for SignalingClient<S> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<S: SignalingTransport> SignalingClient<S> {
    /// Wrap a relay connection.
    pub fn new(transport: S) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Ask the relay for a rendezvous identifier.
    pub async fn register(&self) -> Result<(), TransportError> {
        self.send(SignalMessage::Register).await
    }

    /// Ask the relay to pair us with `peer`.
    pub async fn request_rendezvous(&self, peer: &RendezvousId) -> Result<(), TransportError> {
        self.send(SignalMessage::Connect { id: peer.clone() }).await
    }

    /// Forward an offer to the paired session.
    pub async fn send_offer(&self, offer: SessionDescription) -> Result<(), TransportError> {
        self.send(SignalMessage::Offer { payload: offer }).await
    }

    /// Forward an answer to the paired session.
    pub async fn send_answer(&self, answer: SessionDescription) -> Result<(), TransportError> {
        self.send(SignalMessage::Answer { payload: answer }).await
    }

    /// Forward a candidate to the paired session.
    pub async fn send_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.send(SignalMessage::Candidate { payload: candidate })
            .await
    }

    /// End the pairing without closing the relay connection.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.send(SignalMessage::Disconnect).await
    }

    /// Close the relay connection.
    pub async fn close(&self) {
        if let Err(e) = self.transport.close().await {
            debug!("Relay close failed: {}", e);
        }
    }

    async fn send(&self, message: SignalMessage) -> Result<(), TransportError> {
        let text = message
            .to_json()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        debug!(kind = message.kind(), "Signaling send");
        self.transport.send(text).await
    }

    /// Spawn the task that decodes incoming envelopes into `events`.
    pub fn spawn_reader(&self, events: mpsc::UnboundedSender<SignalingEvent>) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            loop {
                let text = match transport.recv().await {
                    Ok(Some(text)) => text,
                    Ok(None) => {
                        info!("Relay connection closed");
                        let _ = events.send(SignalingEvent::Closed { reason: None });
                        return;
                    }
                    Err(e) => {
                        error!("Relay connection failed: {}", e);
                        let _ = events.send(SignalingEvent::Closed {
                            reason: Some(e.to_string()),
                        });
                        return;
                    }
                };

                let message = match SignalMessage::from_json(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Dropping malformed signaling message: {}", e);
                        continue;
                    }
                };
                debug!(kind = message.kind(), "Signaling recv");

                match classify(message) {
                    Some(event) => {
                        if events.send(event).is_err() {
                            return;
                        }
                    }
                    None => warn!("Ignoring device-to-relay envelope from relay"),
                }
            }
        })
    }
}
