//! Transcriber stage: utterance audio to a streamed transcript.

use std::mem;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::event::{Event, EventKind};
use super::types::Segment;
use super::{push_or_drop, Shutdown, POLL_TIMEOUT};
use crate::providers::SpeechToText;

/// Pull segments off the queue, stream STT over them, and forward the
/// transcribed segment. STT failures drop the segment; a fresh utterance
/// is the cheapest recovery in an interactive setting, so no retry.
pub(crate) async fn run(
    stt: Arc<dyn SpeechToText>,
    sample_rate: u32,
    mut segments: mpsc::Receiver<Segment>,
    transcripts: mpsc::Sender<Segment>,
    events: mpsc::Sender<Event>,
    shutdown: Shutdown,
) {
    debug!("transcriber stage started");
    while !shutdown.is_triggered() {
        let mut segment = match timeout(POLL_TIMEOUT, segments.recv()).await {
            Err(_) => continue,
            Ok(Some(segment)) => segment,
            Ok(None) => break,
        };

        debug!(
            "transcribing {} bytes of detected speech",
            segment.samples.len() * 2
        );

        // Passing ownership of the samples both feeds the provider and
        // clears them from the segment, reclaiming the memory.
        let samples = mem::take(&mut segment.samples);
        let mut stream = match stt.stt_stream(samples, sample_rate).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("transcription request failed, dropping segment: {:#}", e);
                continue;
            }
        };

        push_or_drop(
            &events,
            Event::new(EventKind::TranscriptStart).at(segment.timestamp),
            "events",
        );

        let mut transcript = String::new();
        let mut failed = false;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(text) => {
                    push_or_drop(
                        &events,
                        Event::with_content(EventKind::TranscriptTextDelta, text.as_str()),
                        "events",
                    );
                    transcript.push_str(&text);
                }
                Err(e) => {
                    warn!("transcription stream failed, dropping segment: {:#}", e);
                    failed = true;
                    break;
                }
            }
        }
        // Close the bracket even on a failed stream so the client UI can
        // recover.
        push_or_drop(&events, Event::new(EventKind::TranscriptEnd), "events");

        if failed {
            continue;
        }

        segment.transcript = transcript;
        push_or_drop(&transcripts, segment, "transcripts");
    }
    debug!("transcriber stage stopped");
}
