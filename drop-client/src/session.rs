//! Session facade: one device's relationship to the relay and to at most one
//! peer.
//!
//! A [`Session`] is a cheap handle to a driver task that owns every piece of
//! mutable state. The driver multiplexes four inputs with `select!`:
//!
//! ```text
//! commands (connect / send / disconnect / shutdown)
//! signaling events (relay reader)          ──► SessionActor ──► SessionView (watch)
//! peer events (negotiation attempt pump)                    └─► SessionEvent (broadcast)
//! channel signals (transfer engine tasks)
//! ```
//!
//! Failures never cross the facade: they surface as status changes,
//! [`SessionEvent`]s or a [`Submission`] outcome.

use std::sync::Arc;
use std::time::Duration;

use peerdrop_core::{
    BatchError, BatchProgress, ConnectionStatus, NegotiationEvent, NegotiationNotice,
    OutgoingFile, ReceivedFile, SharedFiles,
};
use peerdrop_types::{RendezvousId, WireError};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::engine::{ChannelEnvelope, ChannelSignal, EngineOutput, FlowControl, TransferEngine};
use crate::negotiator::{ChannelOf, Negotiator, PeerEnvelope};
use crate::signaling::{SignalingClient, SignalingEvent};
use crate::transport::{
    PeerChannel, PeerEvent, PeerFactory, SignalingTransport, TransportError, WebSocketSignaling,
};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Wire format error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Batch accounting error.
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    /// Configuration rejected by [`SessionConfig::validate`].
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Not connected to the relay.
    #[error("not connected")]
    NotConnected,

    /// The session driver has stopped.
    #[error("session closed")]
    SessionClosed,
}

/// Observable session changes.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The relay assigned a rendezvous identifier.
    Registered(RendezvousId),
    /// Connection status changed.
    StatusChanged(ConnectionStatus),
    /// The in-flight flag changed.
    SendingChanged(bool),
    /// A file from the peer was received in full.
    FileReceived(Arc<ReceivedFile>),
    /// The peer acknowledged one of our files.
    FileAcknowledged {
        /// Files acknowledged so far in this batch.
        acknowledged: usize,
        /// Files in the batch.
        total: usize,
    },
    /// Every file of the batch was acknowledged.
    BatchCompleted {
        /// Files in the batch.
        total: usize,
    },
    /// The channel closed before the batch completed.
    BatchAbandoned {
        /// Files acknowledged before the channel closed.
        acknowledged: usize,
        /// Files in the batch.
        total: usize,
    },
    /// The relay rejected a request.
    RelayError(String),
}

/// Snapshot of the session state.
#[derive(Debug, Clone, Default)]
pub struct SessionView {
    /// Connection status.
    pub status: ConnectionStatus,
    /// Our rendezvous identifier, once registered.
    pub rendezvous_id: Option<RendezvousId>,
    /// True for the side that requested the current (or pending) rendezvous.
    pub initiator: bool,
    /// True while a batch awaits acknowledgements.
    pub is_sending: bool,
    /// Every file received during this session, in arrival order.
    pub shared_files: SharedFiles,
}

/// Outcome of [`Session::send_files`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The batch is being sent.
    Accepted {
        /// Files in the batch.
        files: usize,
    },
    /// A batch is already in flight; the submission was ignored.
    AlreadySending,
    /// No open peer channel; the submission was ignored.
    NotConnected,
    /// No files were given.
    Empty,
}

enum Command {
    Connect {
        peer: RendezvousId,
        ack: oneshot::Sender<Result<(), ClientError>>,
    },
    Send {
        files: Vec<OutgoingFile>,
        ack: oneshot::Sender<Submission>,
    },
    Disconnect {
        ack: oneshot::Sender<()>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to a running session.
///
/// Dropping the handle stops the session.
pub struct Session {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<SessionView>,
    events: broadcast::Sender<SessionEvent>,
    task: JoinHandle<()>,
}

impl Session {
    /// Start a session over an established relay connection.
    ///
    /// Registers with the relay and spawns the session driver.
    pub async fn start<S, P>(
        config: SessionConfig,
        transport: S,
        peers: P,
    ) -> Result<Self, ClientError>
    where
        S: SignalingTransport,
        P: PeerFactory,
    {
        config.validate()?;

        let signaling = SignalingClient::new(transport);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let reader = signaling.spawn_reader(signal_tx);
        if let Err(e) = signaling.register().await {
            reader.abort();
            return Err(e.into());
        }

        let (command_tx, command_rx) = mpsc::channel(32);
        let (view_tx, view_rx) = watch::channel(SessionView::default());
        let (events_tx, _) = broadcast::channel(config.event_capacity);
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            negotiator: Negotiator::new(peers, config.ice_servers.clone()),
            signaling,
            engine: None,
            flow: FlowControl::from(&config),
            health_interval: config.health_interval,
            pending_connect: false,
            relay_open: true,
            shared_files: SharedFiles::new(),
            view: view_tx,
            events: events_tx.clone(),
            peer_tx,
            channel_tx,
        };
        let task = tokio::spawn(actor.run(command_rx, signal_rx, peer_rx, channel_rx, reader));

        info!(relay = %config.relay_url, "Session started");
        Ok(Self {
            commands: command_tx,
            view: view_rx,
            events: events_tx,
            task,
        })
    }

    /// Connect to the relay over WebSocket and start a session.
    pub async fn connect_websocket<P: PeerFactory>(
        config: SessionConfig,
        peers: P,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let transport = WebSocketSignaling::connect(&config.relay_url).await?;
        Self::start(config, transport, peers).await
    }

    /// Ask the relay to pair this session with `peer`.
    ///
    /// This side becomes the initiator of the peer negotiation.
    pub async fn connect(&self, peer: RendezvousId) -> Result<(), ClientError> {
        let (ack, done) = oneshot::channel();
        self.command(Command::Connect { peer, ack }).await?;
        done.await.map_err(|_| ClientError::SessionClosed)?
    }

    /// Submit a batch of files to the connected peer.
    pub async fn send_files(&self, files: Vec<OutgoingFile>) -> Result<Submission, ClientError> {
        let (ack, done) = oneshot::channel();
        self.command(Command::Send { files, ack }).await?;
        done.await.map_err(|_| ClientError::SessionClosed)
    }

    /// End the pairing and close the peer channel.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (ack, done) = oneshot::channel();
        self.command(Command::Disconnect { ack }).await?;
        done.await.map_err(|_| ClientError::SessionClosed)
    }

    /// Close the relay connection and stop the session driver.
    pub async fn shutdown(self) -> Result<(), ClientError> {
        let (ack, done) = oneshot::channel();
        self.command(Command::Shutdown { ack }).await?;
        done.await.map_err(|_| ClientError::SessionClosed)?;
        if let Err(e) = self.task.await {
            debug!("Session task ended abnormally: {}", e);
        }
        Ok(())
    }

    /// Current snapshot.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.view.borrow().status
    }

    /// Our rendezvous identifier, once registered.
    pub fn rendezvous_id(&self) -> Option<RendezvousId> {
        self.view.borrow().rendezvous_id.clone()
    }

    /// True while a batch awaits acknowledgements.
    pub fn is_sending(&self) -> bool {
        self.view.borrow().is_sending
    }

    /// Every file received so far.
    pub fn shared_files(&self) -> SharedFiles {
        self.view.borrow().shared_files.clone()
    }

    /// Watch the session snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Subscribe to session events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Wait until the snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SessionView) -> bool,
    ) -> Result<SessionView, ClientError> {
        let mut view = self.view.clone();
        let snapshot = view
            .wait_for(|v| predicate(v))
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        Ok(snapshot.clone())
    }

    async fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::SessionClosed)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let view = self.view.borrow();
        f.debug_struct("Session")
            .field("status", &view.status)
            .field("rendezvous_id", &view.rendezvous_id)
            .finish_non_exhaustive()
    }
}

struct SessionActor<S: SignalingTransport, P: PeerFactory> {
    signaling: SignalingClient<S>,
    negotiator: Negotiator<P>,
    engine: Option<TransferEngine<ChannelOf<P>>>,
    flow: FlowControl,
    health_interval: Option<Duration>,
    /// A `connect` awaits the relay's answer; the next pairing is ours to
    /// initiate.
    pending_connect: bool,
    relay_open: bool,
    shared_files: SharedFiles,
    view: watch::Sender<SessionView>,
    events: broadcast::Sender<SessionEvent>,
    peer_tx: mpsc::UnboundedSender<PeerEnvelope<ChannelOf<P>>>,
    channel_tx: mpsc::UnboundedSender<ChannelEnvelope>,
}

impl<S: SignalingTransport, P: PeerFactory> SessionActor<S, P> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut signals: mpsc::UnboundedReceiver<SignalingEvent>,
        mut peers: mpsc::UnboundedReceiver<PeerEnvelope<ChannelOf<P>>>,
        mut channels: mpsc::UnboundedReceiver<ChannelEnvelope>,
        reader: JoinHandle<()>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { ack }) => {
                        self.shutdown().await;
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(event) = signals.recv() => self.on_signaling(event).await,
                Some(envelope) = peers.recv() => self.on_peer(envelope).await,
                Some(envelope) = channels.recv() => self.on_channel(envelope).await,
            }
        }
        reader.abort();
        info!("Session stopped");
    }

    // ===========================================
    // Commands
    // ===========================================

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect { peer, ack } => {
                let _ = ack.send(self.connect(peer).await);
            }
            Command::Send { files, ack } => {
                let _ = ack.send(self.submit(files));
            }
            Command::Disconnect { ack } => {
                self.disconnect().await;
                let _ = ack.send(());
            }
            Command::Shutdown { ack } => {
                let _ = ack.send(());
            }
        }
    }

    async fn connect(&mut self, peer: RendezvousId) -> Result<(), ClientError> {
        if !self.relay_open {
            return Err(ClientError::NotConnected);
        }
        info!(peer = %peer, "Requesting rendezvous");
        self.set_initiator(true);
        if let Err(e) = self.signaling.request_rendezvous(&peer).await {
            self.set_initiator(false);
            return Err(e.into());
        }
        Ok(())
    }

    fn submit(&mut self, files: Vec<OutgoingFile>) -> Submission {
        let Some(engine) = self.engine.as_mut() else {
            info!("Send ignored, no open peer channel");
            return Submission::NotConnected;
        };
        match engine.submit(files) {
            Ok(files) => {
                self.set_sending(true);
                Submission::Accepted { files }
            }
            Err(BatchError::Empty) => Submission::Empty,
            Err(e) => {
                info!("Send ignored: {}", e);
                Submission::AlreadySending
            }
        }
    }

    async fn disconnect(&mut self) {
        info!("Disconnecting from peer");
        self.negotiate(NegotiationEvent::CloseRequested).await;
        self.set_initiator(false);
        self.set_status(ConnectionStatus::Disconnected);

        if !self.relay_open {
            return;
        }
        // The relay forgets our rendezvous id on disconnect
        if let Err(e) = self.signaling.disconnect().await {
            warn!("Failed to notify relay of disconnect: {}", e);
        }
        self.register_again().await;
    }

    /// Drop the published rendezvous id and ask the relay for a fresh one.
    async fn register_again(&mut self) {
        self.view.send_modify(|view| view.rendezvous_id = None);
        if let Err(e) = self.signaling.register().await {
            warn!("Failed to register again: {}", e);
        }
    }

    async fn shutdown(&mut self) {
        self.negotiate(NegotiationEvent::CloseRequested).await;
        if self.relay_open {
            self.relay_open = false;
            self.signaling.close().await;
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    // ===========================================
    // Relay
    // ===========================================

    async fn on_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Registered(id) => {
                info!(id = %id, "Registered with relay");
                self.view
                    .send_modify(|view| view.rendezvous_id = Some(id.clone()));
                self.emit(SessionEvent::Registered(id));
            }
            SignalingEvent::PeerReady => {
                let initiator = std::mem::take(&mut self.pending_connect);
                info!(initiator, "Paired by relay");
                self.view.send_modify(|view| {
                    view.initiator = initiator;
                    // The relay consumed our id to pair us
                    if !initiator {
                        view.rendezvous_id = None;
                    }
                });
                self.negotiate(NegotiationEvent::PeerReady { initiator })
                    .await;
            }
            SignalingEvent::PeerGone => {
                info!("Peer left");
                self.set_initiator(false);
                self.negotiate(NegotiationEvent::PeerGone).await;
                if self.relay_open {
                    self.register_again().await;
                }
            }
            SignalingEvent::Offer(offer) => {
                self.negotiate(NegotiationEvent::RemoteOffer(offer)).await;
            }
            SignalingEvent::Answer(answer) => {
                self.negotiate(NegotiationEvent::RemoteAnswer(answer)).await;
            }
            SignalingEvent::Candidate(candidate) => {
                self.negotiate(NegotiationEvent::RemoteCandidate(candidate))
                    .await;
            }
            SignalingEvent::RelayError(reason) => {
                warn!("Relay error: {}", reason);
                if self.pending_connect {
                    info!("Rendezvous request rejected");
                    self.set_initiator(false);
                }
                self.emit(SessionEvent::RelayError(reason));
            }
            SignalingEvent::Closed { reason } => {
                match reason {
                    Some(reason) => error!("Relay link lost: {}", reason),
                    None => error!("Relay link lost"),
                }
                self.relay_open = false;
                self.set_initiator(false);
                self.negotiate(NegotiationEvent::CloseRequested).await;
                self.view.send_modify(|view| view.rendezvous_id = None);
                self.set_status(ConnectionStatus::Disconnected);
            }
        }
    }

    // ===========================================
    // Peer connection
    // ===========================================

    async fn on_peer(&mut self, envelope: PeerEnvelope<ChannelOf<P>>) {
        if envelope.generation != self.negotiator.generation() {
            debug!(generation = envelope.generation, "Dropping event from stale peer");
            if let PeerEvent::ChannelOpen(channel) = envelope.event {
                channel.close().await;
            }
            return;
        }

        match envelope.event {
            PeerEvent::LocalCandidate(candidate) => {
                self.negotiate(NegotiationEvent::LocalCandidate(candidate))
                    .await;
            }
            PeerEvent::ChannelOpen(channel) => {
                let notices = self.negotiate(NegotiationEvent::ChannelOpened).await;
                let opened = notices
                    .iter()
                    .any(|n| matches!(n, NegotiationNotice::Opened { .. }));
                if !opened {
                    debug!("Closing unexpected data channel");
                    channel.close().await;
                    return;
                }
                let engine = TransferEngine::open(
                    channel,
                    envelope.generation,
                    self.flow,
                    self.health_interval,
                    self.channel_tx.clone(),
                )
                .await;
                self.engine = Some(engine);
                self.set_status(ConnectionStatus::Connected);
            }
            PeerEvent::Closed => {
                self.negotiate(NegotiationEvent::ChannelClosed).await;
            }
        }
    }

    async fn negotiate(&mut self, event: NegotiationEvent) -> Vec<NegotiationNotice> {
        let notices = self
            .negotiator
            .handle(event, &self.signaling, &self.peer_tx)
            .await;
        for notice in &notices {
            match notice {
                NegotiationNotice::Opened { role } => info!(?role, "Peer connection established"),
                NegotiationNotice::Closed { reason } => {
                    info!("Peer connection closed: {}", reason);
                    self.close_engine().await;
                    self.set_status(ConnectionStatus::Disconnected);
                }
            }
        }
        notices
    }

    // ===========================================
    // Transfer
    // ===========================================

    async fn on_channel(&mut self, envelope: ChannelEnvelope) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if engine.generation() != envelope.generation {
            debug!(generation = envelope.generation, "Dropping signal from stale channel");
            return;
        }

        match envelope.signal {
            ChannelSignal::Frame(frame) => match engine.on_frame(frame).await {
                Ok(Some(output)) => self.on_output(output),
                Ok(None) => {}
                Err(e) => {
                    error!("Transfer failed, closing peer connection: {}", e);
                    self.negotiate(NegotiationEvent::CloseRequested).await;
                }
            },
            ChannelSignal::SendFinished(result) => {
                if let Err(e) = engine.on_send_finished(result) {
                    warn!("Batch send failed: {}", e);
                    self.negotiate(NegotiationEvent::ChannelClosed).await;
                }
            }
            ChannelSignal::Ended => {
                self.negotiate(NegotiationEvent::ChannelClosed).await;
            }
        }
    }

    fn on_output(&mut self, output: EngineOutput) {
        match output {
            EngineOutput::FileReceived(file) => {
                let file = self.shared_files.push(file);
                let files = self.shared_files.clone();
                self.view.send_modify(|view| view.shared_files = files);
                self.emit(SessionEvent::FileReceived(file));
            }
            EngineOutput::Acknowledged { progress, .. } => match progress {
                BatchProgress::Pending {
                    acknowledged,
                    total,
                } => self.emit(SessionEvent::FileAcknowledged {
                    acknowledged,
                    total,
                }),
                BatchProgress::Complete { total } => {
                    self.emit(SessionEvent::FileAcknowledged {
                        acknowledged: total,
                        total,
                    });
                    info!(files = total, "Batch delivered");
                    self.emit(SessionEvent::BatchCompleted { total });
                    self.set_sending(false);
                }
            },
        }
    }

    async fn close_engine(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        if let Some((acknowledged, total)) = engine.close().await {
            warn!(acknowledged, total, "Batch abandoned");
            self.emit(SessionEvent::BatchAbandoned {
                acknowledged,
                total,
            });
        }
        self.set_sending(false);
    }

    // ===========================================
    // Observables
    // ===========================================

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.view.borrow().status == status {
            return;
        }
        info!(%status, "Connection status changed");
        self.view.send_modify(|view| view.status = status);
        self.emit(SessionEvent::StatusChanged(status));
    }

    fn set_initiator(&mut self, initiator: bool) {
        self.pending_connect = initiator;
        self.view.send_modify(|view| view.initiator = initiator);
    }

    fn set_sending(&mut self, is_sending: bool) {
        if self.view.borrow().is_sending == is_sending {
            return;
        }
        self.view.send_modify(|view| view.is_sending = is_sending);
        self.emit(SessionEvent::SendingChanged(is_sending));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
