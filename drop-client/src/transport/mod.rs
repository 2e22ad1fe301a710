//! Transport seams for PeerDrop sessions.
//!
//! Two independent links carry a session:
//! - the **signaling** link to the relay ([`SignalingTransport`]), carrying
//!   JSON text envelopes
//! - the **peer** link ([`PeerFactory`] → [`PeerConnection`] →
//!   [`PeerChannel`]), negotiated through the relay and then carrying the
//!   transfer protocol directly between the two devices
//!
//! Both are traits so the session logic runs unchanged over real sockets
//! (WebSocket + WebRTC) or the in-memory mocks used by the tests.
//!
//! # Example
//!
//! ```ignore
//! let relay = MockRelay::new();
//! let network = MockPeerNetwork::new();
//! let session = Session::start(SessionConfig::default(), relay.connect(), network.clone()).await?;
//! ```

mod mock;
mod websocket;
#[cfg(feature = "webrtc")]
mod webrtc;

pub use mock::{
    MockChannel, MockPeerConnection, MockPeerNetwork, MockRelay, MockSignaling, SentFrame,
};
pub use websocket::WebSocketSignaling;
#[cfg(feature = "webrtc")]
pub use self::webrtc::{WebRtcChannel, WebRtcPeerConnection, WebRtcPeerFactory};

use async_trait::async_trait;
use peerdrop_types::{Frame, IceCandidate, SessionDescription};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Peer channel closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Offer/answer/candidate handling failed.
    #[error("negotiation failed: {0}")]
    Negotiation(String),
}

/// Relay connection carrying signaling envelopes as text frames.
#[async_trait]
pub trait SignalingTransport: Send + Sync + 'static {
    /// Send one text frame to the relay.
    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// Receive the next text frame.
    ///
    /// Returns `Ok(None)` once the relay closed the connection.
    async fn recv(&self) -> Result<Option<String>, TransportError>;

    /// Close the relay connection.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Creates one peer connection per negotiation attempt.
#[async_trait]
pub trait PeerFactory: Send + Sync + 'static {
    /// Connection type produced by this factory.
    type Connection: PeerConnection;

    /// Create a fresh peer connection using the given ICE server URLs.
    async fn create(&self, ice_servers: &[String]) -> Result<Self::Connection, TransportError>;
}

/// Events reported by a peer connection.
pub enum PeerEvent<C> {
    /// A local candidate to forward to the remote device.
    LocalCandidate(IceCandidate),
    /// The data channel is open and ready for frames.
    ChannelOpen(C),
    /// The connection failed or was closed.
    Closed,
}

impl<C> std::fmt::Debug for PeerEvent<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            Self::ChannelOpen(_) => f.write_str("ChannelOpen"),
            Self::Closed => f.write_str("Closed"),
        }
    }
}

/// One peer connection (one negotiation attempt).
#[async_trait]
pub trait PeerConnection: Send + Sync + 'static {
    /// Data channel type carried by this connection.
    type Channel: PeerChannel;

    /// Create the data channel locally and produce an offer.
    ///
    /// The offer is already set as the local description.
    async fn create_offer(&self, label: &str) -> Result<SessionDescription, TransportError>;

    /// Apply a remote offer and produce the answer.
    ///
    /// The answer is already set as the local description.
    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError>;

    /// Apply the remote answer.
    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError>;

    /// Add a remote candidate.
    ///
    /// Fails if the remote description has not been applied yet.
    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Wait for the next connection event.
    ///
    /// Returns `None` once the connection is closed and drained.
    async fn next_event(&self) -> Option<PeerEvent<Self::Channel>>;

    /// Close the connection and its data channel.
    async fn close(&self);
}

/// Established bidirectional, ordered, message-oriented channel.
#[async_trait]
pub trait PeerChannel: Send + Sync + 'static {
    /// Send a text frame.
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Send a binary frame.
    async fn send_binary(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Bytes queued locally but not yet delivered.
    async fn buffered_amount(&self) -> usize;

    /// Threshold at which [`wait_drained`](Self::wait_drained) resolves.
    async fn set_low_water_mark(&self, threshold: usize);

    /// Wait until the buffered amount is at or below the low-water mark.
    ///
    /// Fails with [`TransportError::ChannelClosed`] if the channel closes
    /// while waiting.
    async fn wait_drained(&self) -> Result<(), TransportError>;

    /// Receive the next frame; `None` once the channel closed.
    async fn recv(&self) -> Option<Frame>;

    /// Close the channel.
    async fn close(&self);

    /// Check if the channel is open.
    fn is_open(&self) -> bool;

    /// Bytes sent through this channel.
    fn bytes_sent(&self) -> u64;

    /// Bytes received through this channel.
    fn bytes_received(&self) -> u64;
}
