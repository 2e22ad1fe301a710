//! Transfer engine: chunked file transfer over one open peer channel.
//!
//! Outgoing files of a batch are written strictly one after another:
//!
//! ```text
//! file-meta(A) chunk chunk ... file-end(A) file-meta(B) ... file-end(B)
//! ```
//!
//! Before every frame the sender checks the channel's buffered amount and
//! suspends at the high-water mark until the channel drains below the
//! low-water mark. The receiver rebuilds each file, acknowledges it with
//! `file-received`, and hands it to the session.

use std::sync::Arc;
use std::time::Duration;

use peerdrop_core::{
    chunk_count, BatchError, BatchProgress, BatchSlot, Chunker, OutgoingFile, ReassemblyError,
    ReassemblyTable, ReceivedFile,
};
use peerdrop_types::{ControlMessage, FileId, Frame, WireError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::health;
use crate::transport::{PeerChannel, TransportError};

/// Chunking and backpressure parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    /// Bytes per binary chunk.
    pub chunk_size: usize,
    /// Suspend sending at this many buffered bytes.
    pub high_water_mark: usize,
    /// Resume sending at or below this many buffered bytes.
    pub low_water_mark: usize,
}

impl From<&SessionConfig> for FlowControl {
    fn from(config: &SessionConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            high_water_mark: config.high_water_mark,
            low_water_mark: config.low_water_mark,
        }
    }
}

/// Errors that end the current channel.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The remote broke the frame order.
    #[error("reassembly failed: {0}")]
    Reassembly(#[from] ReassemblyError),

    /// The channel failed while writing.
    #[error("channel failed: {0}")]
    Transport(#[from] TransportError),

    /// A control message could not be encoded.
    #[error("encoding failed: {0}")]
    Wire(#[from] WireError),
}

/// What the engine's background tasks report.
#[derive(Debug)]
pub enum ChannelSignal {
    /// A frame arrived on the channel.
    Frame(Frame),
    /// The channel stopped delivering frames.
    Ended,
    /// The batch sender finished writing.
    SendFinished(Result<(), TransportError>),
}

/// A channel signal tagged with the channel generation.
#[derive(Debug)]
pub struct ChannelEnvelope {
    /// Generation of the channel that produced the signal.
    pub generation: u64,
    /// The signal.
    pub signal: ChannelSignal,
}

/// Result of handling one incoming frame.
#[derive(Debug)]
pub enum EngineOutput {
    /// A file finished and was acknowledged to the sender.
    FileReceived(ReceivedFile),
    /// The remote acknowledged one of our files.
    Acknowledged {
        /// The acknowledged file, if named.
        id: Option<FileId>,
        /// Batch progress after the acknowledgement.
        progress: BatchProgress,
    },
}

/// Per-channel transfer state.
pub struct TransferEngine<C: PeerChannel> {
    channel: Arc<C>,
    generation: u64,
    flow: FlowControl,
    signals: mpsc::UnboundedSender<ChannelEnvelope>,
    batch: BatchSlot,
    reassembly: ReassemblyTable,
    sender: Option<JoinHandle<()>>,
    reader: JoinHandle<()>,
    sampler: Option<JoinHandle<()>>,
}

impl<C: PeerChannel> TransferEngine<C> {
    /// Take over an open channel and start reading from it.
    pub async fn open(
        channel: C,
        generation: u64,
        flow: FlowControl,
        health_interval: Option<Duration>,
        signals: mpsc::UnboundedSender<ChannelEnvelope>,
    ) -> Self {
        let channel = Arc::new(channel);
        channel.set_low_water_mark(flow.low_water_mark).await;

        let reader = {
            let channel = Arc::clone(&channel);
            let signals = signals.clone();
            tokio::spawn(async move {
                while let Some(frame) = channel.recv().await {
                    let envelope = ChannelEnvelope {
                        generation,
                        signal: ChannelSignal::Frame(frame),
                    };
                    if signals.send(envelope).is_err() {
                        return;
                    }
                }
                let _ = signals.send(ChannelEnvelope {
                    generation,
                    signal: ChannelSignal::Ended,
                });
            })
        };

        let sampler =
            health_interval.map(|interval| health::spawn_sampler(Arc::clone(&channel), interval));

        info!(generation, "Data channel open");
        Self {
            channel,
            generation,
            flow,
            signals,
            batch: BatchSlot::new(),
            reassembly: ReassemblyTable::new(),
            sender: None,
            reader,
            sampler,
        }
    }

    /// Generation of the channel this engine runs on.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while a batch awaits acknowledgements.
    pub fn is_sending(&self) -> bool {
        self.batch.is_in_flight()
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }

    /// Start sending a batch.
    ///
    /// Fails with [`BatchError::AlreadyInFlight`] while a batch is
    /// outstanding and [`BatchError::Empty`] for an empty list.
    pub fn submit(&mut self, files: Vec<OutgoingFile>) -> Result<usize, BatchError> {
        let files: Vec<(FileId, OutgoingFile)> =
            files.into_iter().map(|file| (FileId::new(), file)).collect();
        self.batch
            .begin(files.iter().map(|(id, _)| *id).collect())?;

        let total = files.len();
        let channel = Arc::clone(&self.channel);
        let signals = self.signals.clone();
        let generation = self.generation;
        let flow = self.flow;
        self.sender = Some(tokio::spawn(async move {
            let result = send_batch(channel.as_ref(), files, flow).await;
            let _ = signals.send(ChannelEnvelope {
                generation,
                signal: ChannelSignal::SendFinished(result),
            });
        }));

        info!(files = total, "Batch submitted");
        Ok(total)
    }

    /// The batch sender finished; a write error ends the channel.
    pub fn on_send_finished(
        &mut self,
        result: Result<(), TransportError>,
    ) -> Result<(), EngineError> {
        self.sender = None;
        result.map_err(EngineError::from)
    }

    /// Handle one incoming frame.
    pub async fn on_frame(&mut self, frame: Frame) -> Result<Option<EngineOutput>, EngineError> {
        let text = match frame {
            Frame::Binary(data) => {
                self.reassembly.append(data)?;
                return Ok(None);
            }
            Frame::Text(text) => text,
        };

        let message = match ControlMessage::from_json(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring undecodable control message: {}", e);
                return Ok(None);
            }
        };

        match message {
            ControlMessage::FileMeta(meta) => {
                info!(file = %meta.id, name = %meta.name, size = meta.size, "Receiving file");
                self.reassembly.begin(meta)?;
                Ok(None)
            }
            ControlMessage::FileEnd { id } => {
                let file = self.reassembly.finish(id)?;
                let ack = ControlMessage::FileReceived { id: Some(id) }.to_json()?;
                self.channel.send_text(&ack).await?;
                info!(file = %id, name = %file.name, size = file.size(), "File received");
                Ok(Some(EngineOutput::FileReceived(file)))
            }
            ControlMessage::FileReceived { id } => match self.batch.acknowledge(id) {
                Ok(progress) => {
                    debug!(?progress, "File acknowledged");
                    Ok(Some(EngineOutput::Acknowledged { id, progress }))
                }
                Err(e) => {
                    warn!("Ignoring acknowledgement: {}", e);
                    Ok(None)
                }
            },
        }
    }

    /// Stop all tasks and close the channel.
    ///
    /// Returns `(acknowledged, total)` of a batch that was still in flight.
    pub async fn close(mut self) -> Option<(usize, usize)> {
        if let Some(sender) = self.sender.take() {
            sender.abort();
        }
        self.reader.abort();
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }
        self.channel.close().await;

        let partial = self.reassembly.pending();
        if partial > 0 {
            debug!(partial, "Discarding partially received files");
        }
        self.reassembly.clear();
        self.batch.abandon()
    }
}

async fn send_batch<C: PeerChannel>(
    channel: &C,
    files: Vec<(FileId, OutgoingFile)>,
    flow: FlowControl,
) -> Result<(), TransportError> {
    for (id, file) in files {
        info!(
            file = %id,
            name = %file.name,
            size = file.size(),
            chunks = chunk_count(file.bytes.len(), flow.chunk_size),
            "Sending file"
        );

        send_control(channel, &ControlMessage::FileMeta(file.meta(id)), &flow).await?;
        for chunk in Chunker::new(&file.bytes, flow.chunk_size) {
            wait_for_room(channel, &flow).await?;
            channel.send_binary(chunk).await?;
        }
        send_control(channel, &ControlMessage::FileEnd { id }, &flow).await?;
    }
    Ok(())
}

async fn send_control<C: PeerChannel>(
    channel: &C,
    message: &ControlMessage,
    flow: &FlowControl,
) -> Result<(), TransportError> {
    let text = message
        .to_json()
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;
    wait_for_room(channel, flow).await?;
    channel.send_text(&text).await
}

async fn wait_for_room<C: PeerChannel>(
    channel: &C,
    flow: &FlowControl,
) -> Result<(), TransportError> {
    let buffered = channel.buffered_amount().await;
    if buffered >= flow.high_water_mark {
        debug!(buffered, "Channel above high-water mark, waiting to drain");
        channel.wait_drained().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockChannel, SentFrame};
    use peerdrop_types::{FileMeta, CHUNK_SIZE, HIGH_WATER_MARK, LOW_WATER_MARK};

    fn flow() -> FlowControl {
        FlowControl {
            chunk_size: CHUNK_SIZE,
            high_water_mark: HIGH_WATER_MARK,
            low_water_mark: LOW_WATER_MARK,
        }
    }

    fn file(name: &str, len: usize) -> OutgoingFile {
        let bytes = (0..len).map(|i| (i % 251) as u8).collect();
        OutgoingFile::new(name, "application/octet-stream", bytes)
    }

    fn meta(id: FileId, size: u64) -> Frame {
        Frame::control(&ControlMessage::FileMeta(FileMeta {
            id,
            name: "a.bin".into(),
            size,
            mime: "application/octet-stream".into(),
        }))
        .unwrap()
    }

    fn end(id: FileId) -> Frame {
        Frame::control(&ControlMessage::FileEnd { id }).unwrap()
    }

    async fn engine() -> (
        TransferEngine<MockChannel>,
        MockChannel,
        mpsc::UnboundedReceiver<ChannelEnvelope>,
    ) {
        let (local, remote) = MockChannel::pair();
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = TransferEngine::open(local, 1, flow(), None, tx).await;
        (engine, remote, rx)
    }

    // ===========================================
    // Sending
    // ===========================================

    #[tokio::test]
    async fn frames_are_serialized_per_file() {
        let (local, remote) = MockChannel::pair();
        let files = vec![(FileId::new(), file("a", 40_000)), (FileId::new(), file("b", 0))];
        send_batch(&local, files, flow()).await.unwrap();

        let log = local.sent_log();
        assert_eq!(log.len(), 7);
        assert!(matches!(&log[0], SentFrame::Text(t) if t.contains("file-meta")));
        assert_eq!(log[1], SentFrame::Binary(16384));
        assert_eq!(log[2], SentFrame::Binary(16384));
        assert_eq!(log[3], SentFrame::Binary(7232));
        assert!(matches!(&log[4], SentFrame::Text(t) if t.contains("file-end")));
        assert!(matches!(&log[5], SentFrame::Text(t) if t.contains("file-meta")));
        assert!(matches!(&log[6], SentFrame::Text(t) if t.contains("file-end")));
        drop(remote);
    }

    #[tokio::test]
    async fn sender_respects_high_water_mark() {
        let (local, remote) = MockChannel::pair();
        local.set_low_water_mark(LOW_WATER_MARK).await;
        let local = Arc::new(local);

        let sender = {
            let local = Arc::clone(&local);
            tokio::spawn(async move {
                let files = vec![(FileId::new(), file("big", 1024 * 1024))];
                send_batch(local.as_ref(), files, flow()).await
            })
        };

        // Let the sender fill the buffer before anything is read
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sender.is_finished());

        let mut received = 0;
        while let Some(frame) = remote.recv().await {
            received += 1;
            if let Frame::Text(text) = &frame {
                if text.contains("file-end") {
                    break;
                }
            }
        }

        sender.await.unwrap().unwrap();
        assert_eq!(received, 1 + 64 + 1);
        assert!(local.peak_buffered() <= HIGH_WATER_MARK + CHUNK_SIZE);
    }

    #[tokio::test]
    async fn sender_fails_when_channel_closes() {
        let (local, remote) = MockChannel::pair();
        remote.close().await;
        let files = vec![(FileId::new(), file("a", 10))];
        assert_eq!(
            send_batch(&local, files, flow()).await,
            Err(TransportError::ChannelClosed)
        );
    }

    #[tokio::test]
    async fn second_batch_is_rejected_while_in_flight() {
        let (mut engine, _remote, _rx) = engine().await;
        assert_eq!(engine.submit(vec![file("a", 10)]), Ok(1));
        assert!(engine.is_sending());
        assert_eq!(
            engine.submit(vec![file("b", 10)]),
            Err(BatchError::AlreadyInFlight)
        );
        assert_eq!(engine.submit(vec![]), Err(BatchError::AlreadyInFlight));
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let (mut engine, _remote, _rx) = engine().await;
        assert_eq!(engine.submit(vec![]), Err(BatchError::Empty));
        assert!(!engine.is_sending());
    }

    // ===========================================
    // Receiving
    // ===========================================

    #[tokio::test]
    async fn file_is_rebuilt_and_acknowledged() {
        let (mut engine, remote, _rx) = engine().await;
        let id = FileId::new();

        assert!(engine.on_frame(meta(id, 5)).await.unwrap().is_none());
        engine.on_frame(Frame::Binary(b"he".to_vec())).await.unwrap();
        engine.on_frame(Frame::Binary(b"llo".to_vec())).await.unwrap();
        let output = engine.on_frame(end(id)).await.unwrap();

        match output {
            Some(EngineOutput::FileReceived(file)) => {
                assert_eq!(file.id, id);
                assert_eq!(file.bytes, b"hello");
            }
            other => panic!("Expected FileReceived, got {:?}", other),
        }

        let ack = remote.recv().await.unwrap().as_control().unwrap();
        assert_eq!(ack, ControlMessage::FileReceived { id: Some(id) });
    }

    #[tokio::test]
    async fn stray_chunk_after_file_end_is_not_merged() {
        let (mut engine, _remote, _rx) = engine().await;
        let a = FileId::new();
        engine.on_frame(meta(a, 3)).await.unwrap();
        engine.on_frame(Frame::Binary(b"abc".to_vec())).await.unwrap();
        let first = engine.on_frame(end(a)).await.unwrap();
        assert!(matches!(first, Some(EngineOutput::FileReceived(f)) if f.bytes == b"abc"));

        let stray = engine.on_frame(Frame::Binary(b"zz".to_vec())).await;
        assert!(matches!(
            stray,
            Err(EngineError::Reassembly(ReassemblyError::NoActiveFile))
        ));
    }

    #[tokio::test]
    async fn interleaved_files_are_rejected() {
        let (mut engine, _remote, _rx) = engine().await;
        engine.on_frame(meta(FileId::new(), 10)).await.unwrap();
        let result = engine.on_frame(meta(FileId::new(), 10)).await;
        assert!(matches!(
            result,
            Err(EngineError::Reassembly(ReassemblyError::Interleaved { .. }))
        ));
    }

    #[tokio::test]
    async fn undecodable_text_is_ignored() {
        let (mut engine, _remote, _rx) = engine().await;
        let output = engine.on_frame(Frame::Text("not json".into())).await;
        assert!(matches!(output, Ok(None)));
    }

    #[tokio::test]
    async fn unexpected_acknowledgement_is_ignored() {
        let (mut engine, _remote, _rx) = engine().await;
        let ack = Frame::control(&ControlMessage::FileReceived { id: None }).unwrap();
        assert!(matches!(engine.on_frame(ack).await, Ok(None)));
    }

    #[tokio::test]
    async fn acknowledgements_complete_the_batch() {
        let (mut engine, _remote, _rx) = engine().await;
        engine.submit(vec![file("a", 1), file("b", 1)]).unwrap();

        let ack = Frame::control(&ControlMessage::FileReceived { id: None }).unwrap();
        let first = engine.on_frame(ack.clone()).await.unwrap();
        assert!(matches!(
            first,
            Some(EngineOutput::Acknowledged {
                progress: BatchProgress::Pending { acknowledged: 1, total: 2 },
                ..
            })
        ));
        let second = engine.on_frame(ack).await.unwrap();
        assert!(matches!(
            second,
            Some(EngineOutput::Acknowledged {
                progress: BatchProgress::Complete { total: 2 },
                ..
            })
        ));
        assert!(!engine.is_sending());
    }

    // ===========================================
    // Teardown
    // ===========================================

    #[tokio::test]
    async fn close_abandons_batch_in_flight() {
        let (mut engine, _remote, _rx) = engine().await;
        engine.submit(vec![file("a", 1), file("b", 1), file("c", 1)]).unwrap();
        let ack = Frame::control(&ControlMessage::FileReceived { id: None }).unwrap();
        engine.on_frame(ack).await.unwrap();

        let channel = Arc::clone(engine.channel());
        assert_eq!(engine.close().await, Some((1, 3)));
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn reader_reports_frames_and_end() {
        let (engine, remote, mut rx) = engine().await;
        remote.send_text("hi").await.unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.generation, 1);
        assert!(matches!(envelope.signal, ChannelSignal::Frame(Frame::Text(ref t)) if t == "hi"));

        remote.close().await;
        let envelope = rx.recv().await.unwrap();
        assert!(matches!(envelope.signal, ChannelSignal::Ended));
        drop(engine);
    }
}
