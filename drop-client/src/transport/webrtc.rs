//! WebRTC peer transport (webrtc-rs).
//!
//! Enabled with the `webrtc` feature. Callbacks registered on the
//! `RTCPeerConnection` and `RTCDataChannel` are bridged into channels so the
//! session sees the same pull-style [`PeerConnection`] / [`PeerChannel`]
//! interface as with the mocks.

use super::{PeerChannel, PeerConnection, PeerEvent, PeerFactory, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use peerdrop_types::{Frame, IceCandidate, SessionDescription};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

type EventSender = mpsc::UnboundedSender<PeerEvent<WebRtcChannel>>;

fn negotiation(e: webrtc::Error) -> TransportError {
    TransportError::Negotiation(e.to_string())
}

/// Creates webrtc-rs peer connections.
#[derive(Debug, Clone, Default)]
pub struct WebRtcPeerFactory;

impl WebRtcPeerFactory {
    /// Create a new factory.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    type Connection = WebRtcPeerConnection;

    async fn create(&self, ice_servers: &[String]) -> Result<WebRtcPeerConnection, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let tx = events_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(PeerEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        let tx = events_tx.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = tx.clone();
            Box::pin(async move {
                debug!(label = dc.label(), "Remote data channel announced");
                wire_channel(dc, tx).await;
            })
        }));

        let tx = events_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(?state, "Peer connection state changed");
            if matches!(
                state,
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
            ) {
                let _ = tx.send(PeerEvent::Closed);
            }
            Box::pin(async {})
        }));

        Ok(WebRtcPeerConnection {
            pc,
            events_tx,
            events_rx: Mutex::new(events_rx),
        })
    }
}

/// A webrtc-rs peer connection.
pub struct WebRtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
    events_tx: EventSender,
    events_rx: Mutex<mpsc::UnboundedReceiver<PeerEvent<WebRtcChannel>>>,
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    type Channel = WebRtcChannel;

    async fn create_offer(&self, label: &str) -> Result<SessionDescription, TransportError> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(negotiation)?;
        wire_channel(dc, self.events_tx.clone()).await;

        let offer = self.pc.create_offer(None).await.map_err(negotiation)?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(negotiation)?;
        Ok(SessionDescription::offer(sdp))
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        let remote = RTCSessionDescription::offer(offer.sdp).map_err(negotiation)?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(negotiation)?;

        let answer = self.pc.create_answer(None).await.map_err(negotiation)?;
        let sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .map_err(negotiation)?;
        Ok(SessionDescription::answer(sdp))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError> {
        let remote = RTCSessionDescription::answer(answer.sdp).map_err(negotiation)?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(negotiation)
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc.add_ice_candidate(init).await.map_err(negotiation)
    }

    async fn next_event(&self) -> Option<PeerEvent<WebRtcChannel>> {
        self.events_rx.lock().await.recv().await
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
    }
}

#[derive(Debug, Default)]
struct ChannelState {
    closed: AtomicBool,
    closed_notify: Notify,
    drained: Notify,
    low_water: AtomicUsize,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// A webrtc-rs data channel.
pub struct WebRtcChannel {
    dc: Arc<RTCDataChannel>,
    frames: Mutex<mpsc::UnboundedReceiver<Frame>>,
    state: Arc<ChannelState>,
}

/// Bridge the data channel callbacks and announce the channel once it opens.
async fn wire_channel(dc: Arc<RTCDataChannel>, events: EventSender) {
    let state = Arc::new(ChannelState::default());
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();

    let counters = Arc::clone(&state);
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        counters
            .bytes_received
            .fetch_add(msg.data.len() as u64, Ordering::Relaxed);
        let frame = if msg.is_string {
            Frame::Text(String::from_utf8_lossy(&msg.data).into_owned())
        } else {
            Frame::Binary(msg.data.to_vec())
        };
        let _ = frames_tx.send(frame);
        Box::pin(async {})
    }));

    let drained = Arc::clone(&state);
    dc.on_buffered_amount_low(Box::new(move || {
        drained.drained.notify_waiters();
        Box::pin(async {})
    }))
    .await;

    let closing = Arc::clone(&state);
    dc.on_close(Box::new(move || {
        closing.closed.store(true, Ordering::SeqCst);
        closing.drained.notify_waiters();
        closing.closed_notify.notify_waiters();
        Box::pin(async {})
    }));

    let channel = WebRtcChannel {
        dc: Arc::clone(&dc),
        frames: Mutex::new(frames_rx),
        state,
    };
    dc.on_open(Box::new(move || {
        let _ = events.send(PeerEvent::ChannelOpen(channel));
        Box::pin(async {})
    }));
}

#[async_trait]
impl PeerChannel for WebRtcChannel {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        let sent = self
            .dc
            .send_text(text.to_string())
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.state
            .bytes_sent
            .fetch_add(sent as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn send_binary(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        let sent = self
            .dc
            .send(&Bytes::copy_from_slice(data))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.state
            .bytes_sent
            .fetch_add(sent as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        self.dc.buffered_amount().await
    }

    async fn set_low_water_mark(&self, threshold: usize) {
        self.state.low_water.store(threshold, Ordering::SeqCst);
        self.dc.set_buffered_amount_low_threshold(threshold).await;
    }

    async fn wait_drained(&self) -> Result<(), TransportError> {
        loop {
            let notified = self.state.drained.notified();
            if self.state.closed.load(Ordering::SeqCst) {
                return Err(TransportError::ChannelClosed);
            }
            if self.dc.buffered_amount().await <= self.state.low_water.load(Ordering::SeqCst) {
                return Ok(());
            }
            notified.await;
        }
    }

    async fn recv(&self) -> Option<Frame> {
        let mut frames = self.frames.lock().await;
        loop {
            let closed = self.state.closed_notify.notified();
            if let Ok(frame) = frames.try_recv() {
                return Some(frame);
            }
            if self.state.closed.load(Ordering::SeqCst) {
                return None;
            }
            tokio::select! {
                frame = frames.recv() => return frame,
                _ = closed => {}
            }
        }
    }

    async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            warn!("Failed to close data channel: {}", e);
        }
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    fn bytes_sent(&self) -> u64 {
        self.state.bytes_sent.load(Ordering::Relaxed)
    }

    fn bytes_received(&self) -> u64 {
        self.state.bytes_received.load(Ordering::Relaxed)
    }
}
