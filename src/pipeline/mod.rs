//! The staged voice-conversation pipeline.
//!
//! One pipeline per connection, five long-lived stages over bounded
//! queues:
//!
//! ```text
//! client -> Ingest -> VadSegmenter -> Transcriber -> AgentDriver -> EventMux -> client
//!             |q1           |q2             |q3             |q4
//!          (frames)      (segments)    (transcripts)     (events)
//! ```
//!
//! Every queue holds at most [`QUEUE_CAPACITY`] items and drops the
//! newest item with a warning when saturated; for realtime audio,
//! shedding load beats falling behind. Queues are the only shared
//! mutable state between stages; each item is owned by exactly one
//! stage at a time.

pub mod event;
pub mod types;

mod respond;
mod transcribe;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::providers::{ConversationAgent, SpeechToText, TextToSpeech};
use crate::vad::segmenter::VadSegmenter;
use crate::vad::SpeechDetector;
use event::{now_epoch_secs, Event};
use types::{AudioFrame, ControlMessage, PipelineConfig, Segment};

/// Bound of every inter-stage queue.
pub const QUEUE_CAPACITY: usize = 60;

/// Blocking receives tick at this interval so shutdown stays responsive.
pub(crate) const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Messages arriving from the client channel.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Binary(Vec<u8>),
    Text(String),
}

/// Read half of the client connection.
#[async_trait]
pub trait ChannelSource: Send {
    /// Next message; `None` once the peer is gone. Errors are terminal.
    async fn recv(&mut self) -> Result<Option<ClientMessage>>;
}

/// Write half of the client connection.
#[async_trait]
pub trait ChannelSink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
}

/// Cooperative shutdown flag shared by every stage.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

#[derive(Default)]
struct ShutdownInner {
    triggered: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

/// Enqueue without waiting; under saturation the newest item is shed.
pub(crate) fn push_or_drop<T>(tx: &mpsc::Sender<T>, item: T, queue: &str) {
    match tx.try_send(item) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("{} queue full, dropping newest item", queue);
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("{} queue closed, item discarded", queue);
        }
    }
}

/// End-to-end processing for one client connection.
pub struct VoicePipeline<R, W> {
    config: PipelineConfig,
    source: R,
    sink: W,
    segmenter: VadSegmenter,
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    agent: Arc<dyn ConversationAgent>,
    shutdown: Shutdown,
}

impl<R, W> VoicePipeline<R, W>
where
    R: ChannelSource + 'static,
    W: ChannelSink + 'static,
{
    pub fn new(
        config: PipelineConfig,
        source: R,
        sink: W,
        detector: Arc<Mutex<dyn SpeechDetector>>,
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn TextToSpeech>,
        agent: Arc<dyn ConversationAgent>,
    ) -> Result<Self> {
        let segmenter = VadSegmenter::new(&config, detector)?;
        Ok(Self {
            config,
            source,
            sink,
            segmenter,
            stt,
            tts,
            agent,
            shutdown: Shutdown::new(),
        })
    }

    /// Handle for requesting a graceful stop from outside the pipeline.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run every stage until the client disconnects or shutdown is
    /// requested, then cancel, drain, and clean up.
    pub async fn run(self) -> Result<()> {
        info!("starting voice pipeline");

        let (frames_tx, frames_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (segments_tx, segments_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (transcripts_tx, transcripts_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(QUEUE_CAPACITY);

        // Warm-up: with an opening prompt configured, the assistant
        // speaks first.
        if let Some(prompt) = self.config.opening_prompt.clone() {
            push_or_drop(
                &transcripts_tx,
                Segment::transcribed(now_epoch_secs(), prompt),
                "transcripts",
            );
        }

        let shutdown = self.shutdown.clone();
        let mut stages = JoinSet::new();
        {
            let header_bytes = self.config.header_bytes;
            let shutdown = shutdown.clone();
            let source = self.source;
            stages.spawn(async move {
                ingest(source, header_bytes, frames_tx, shutdown).await;
                "ingest"
            });
        }
        {
            let shutdown = shutdown.clone();
            let segmenter = self.segmenter;
            stages.spawn(async move {
                segment_stage(segmenter, frames_rx, segments_tx, shutdown).await;
                "segmenter"
            });
        }
        {
            let shutdown = shutdown.clone();
            let stt = self.stt;
            let sample_rate = self.config.audio_sample_rate;
            let events = events_tx.clone();
            stages.spawn(async move {
                transcribe::run(stt, sample_rate, segments_rx, transcripts_tx, events, shutdown)
                    .await;
                "transcriber"
            });
        }
        {
            let shutdown = shutdown.clone();
            let agent = self.agent;
            let tts = self.tts;
            stages.spawn(async move {
                respond::run(agent, tts, transcripts_rx, events_tx, shutdown).await;
                "agent driver"
            });
        }
        {
            let shutdown = shutdown.clone();
            let sink = self.sink;
            stages.spawn(async move {
                event_mux(sink, events_rx, shutdown).await;
                "event mux"
            });
        }

        // First completed wins: either a clean shutdown request or a
        // stage exiting on its own (EOF, terminal error).
        tokio::select! {
            _ = shutdown.wait() => {
                info!("shutdown signal received");
            }
            finished = stages.join_next() => {
                if let Some(Ok(stage)) = finished {
                    warn!("stage '{}' completed unexpectedly", stage);
                }
            }
        }

        // Cancel the rest and await them with failures suppressed; the
        // queues drain as their endpoints drop.
        shutdown.trigger();
        stages.shutdown().await;

        info!("pipeline cleanup completed");
        Ok(())
    }
}

/// Ingest stage: demultiplex channel messages into audio frames and
/// control messages.
async fn ingest<R: ChannelSource>(
    mut source: R,
    header_bytes: usize,
    frames: mpsc::Sender<AudioFrame>,
    shutdown: Shutdown,
) {
    debug!("ingest stage started");
    // Written and read only here; while the client plays assistant audio
    // its microphone frames are suppressed (no barge-in).
    let mut tts_playing = false;

    while !shutdown.is_triggered() {
        let message = match timeout(POLL_TIMEOUT, source.recv()).await {
            Err(_) => continue,
            Ok(Ok(Some(message))) => message,
            Ok(Ok(None)) => {
                info!("client channel closed");
                break;
            }
            Ok(Err(e)) => {
                warn!("client channel error: {:#}", e);
                break;
            }
        };

        match message {
            ClientMessage::Binary(raw) => {
                if tts_playing {
                    continue;
                }
                if raw.len() < header_bytes {
                    warn!("received invalid audio frame of {} bytes", raw.len());
                    continue;
                }
                match AudioFrame::parse(&raw) {
                    Ok(frame) => push_or_drop(&frames, frame, "frames"),
                    Err(e) => warn!("discarding malformed audio frame: {:#}", e),
                }
            }
            ClientMessage::Text(text) => match serde_json::from_str::<ControlMessage>(&text) {
                Ok(ControlMessage::TtsStart) => tts_playing = true,
                Ok(ControlMessage::TtsEnd) => tts_playing = false,
                Ok(ControlMessage::Unknown) => {
                    debug!("ignoring unknown control message: {}", text)
                }
                Err(e) => warn!("dropping malformed control message: {:#}", e),
            },
        }
    }

    // Losing the client channel is terminal for the whole pipeline.
    shutdown.trigger();
    debug!("ingest stage stopped");
}

/// Segmenter stage: frames in, finished utterances out.
async fn segment_stage(
    mut segmenter: VadSegmenter,
    mut frames: mpsc::Receiver<AudioFrame>,
    segments: mpsc::Sender<Segment>,
    shutdown: Shutdown,
) {
    debug!("segmenter stage started");
    while !shutdown.is_triggered() {
        let frame = match timeout(POLL_TIMEOUT, frames.recv()).await {
            Err(_) => continue,
            Ok(Some(frame)) => frame,
            Ok(None) => break,
        };

        match segmenter.process_frame(frame).await {
            Ok(Some(segment)) => push_or_drop(&segments, segment, "segments"),
            Ok(None) => {}
            // The segmenter already reset its buffer; keep reading.
            Err(e) => warn!("audio segmentation failed: {:#}", e),
        }
    }
    debug!("segmenter stage stopped");
}

/// EventMux stage: the single writer serializing events to the client.
async fn event_mux<W: ChannelSink>(
    mut sink: W,
    mut events: mpsc::Receiver<Event>,
    shutdown: Shutdown,
) {
    debug!("event mux stage started");
    while !shutdown.is_triggered() {
        let event = match timeout(POLL_TIMEOUT, events.recv()).await {
            Err(_) => continue,
            Ok(Some(event)) => event,
            Ok(None) => break,
        };

        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("failed to serialize event: {:#}", e);
                continue;
            }
        };

        if let Err(e) = sink.send_text(payload).await {
            warn!("client write failed, shutting down pipeline: {:#}", e);
            shutdown.trigger();
            break;
        }
    }
    debug!("event mux stage stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_or_drop_sheds_newest() {
        let (tx, mut rx) = mpsc::channel(2);
        push_or_drop(&tx, 1, "test");
        push_or_drop(&tx, 2, "test");
        // Queue is full; the newest item is the one shed.
        push_or_drop(&tx, 3, "test");

        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_push_or_drop_closed_queue_is_silent() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        // Must not panic.
        push_or_drop(&tx, 1, "test");
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());

        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.trigger();

        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .expect("waiter should not panic");
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_triggered() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        timeout(Duration::from_millis(100), shutdown.wait())
            .await
            .expect("wait should not block after trigger");
    }
}
