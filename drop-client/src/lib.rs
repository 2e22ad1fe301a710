//! # drop-client
//!
//! Session client for PeerDrop: pair two devices through a relay, open a
//! direct peer channel, and exchange files over it.
//!
//! ## Features
//!
//! - **Rendezvous**: register with the relay, share the identifier, pair
//! - **Peer negotiation**: offer/answer/candidate exchange driven by the pure
//!   state machine in `drop-core`
//! - **Chunked transfer**: ordered frames with high/low-water backpressure
//!   and per-file acknowledgements
//! - **Transport abstraction**: pluggable signaling and peer transports
//!   (WebSocket, webrtc-rs behind the `webrtc` feature, in-memory mocks)
//!
//! ## Example
//!
//! ```ignore
//! use peerdrop_client::{OutgoingFile, Session, SessionConfig, WebRtcPeerFactory};
//!
//! let config = SessionConfig::new("ws://localhost:3001/ws");
//! let session = Session::connect_websocket(config, WebRtcPeerFactory::new()).await?;
//!
//! // Pair with the device showing this identifier
//! session.connect("7c0e...".into()).await?;
//! session.wait_for(|view| view.status.is_connected()).await?;
//!
//! session
//!     .send_files(vec![OutgoingFile::new("notes.txt", "text/plain", bytes)])
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod health;
pub mod negotiator;
pub mod session;
pub mod signaling;
pub mod transport;

pub use config::SessionConfig;
pub use engine::{EngineError, FlowControl, TransferEngine};
pub use health::HealthSample;
pub use negotiator::Negotiator;
pub use session::{ClientError, Session, SessionEvent, SessionView, Submission};
pub use signaling::{SignalingClient, SignalingEvent};
pub use transport::{
    MockChannel, MockPeerConnection, MockPeerNetwork, MockRelay, MockSignaling, PeerChannel,
    PeerConnection, PeerEvent, PeerFactory, SentFrame, SignalingTransport, TransportError,
    WebSocketSignaling,
};
#[cfg(feature = "webrtc")]
pub use transport::{WebRtcChannel, WebRtcPeerConnection, WebRtcPeerFactory};

pub use peerdrop_core::{ConnectionStatus, OutgoingFile, ReceivedFile, SharedFiles};
pub use peerdrop_types::{FileId, RendezvousId};
