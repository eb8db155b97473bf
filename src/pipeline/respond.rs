//! AgentDriver stage: transcripts to streamed reply text interleaved
//! with sentence-bounded speech synthesis.
//!
//! Reply tokens accumulate in a rolling buffer; whenever the buffer
//! contains a sentence ending, everything up to the rightmost one is
//! spoken. Waiting for the rightmost boundary lets partial tokens after
//! it gather more context, which keeps the TTS prosody intact while
//! bounding latency to one sentence.

use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::event::{Event, EventKind};
use super::types::Segment;
use super::{push_or_drop, Shutdown, POLL_TIMEOUT};
use crate::audio::i16_to_bytes;
use crate::providers::{ConversationAgent, TextToSpeech};

/// Characters that close a speakable sentence.
const SENTENCE_ENDINGS: [char; 4] = ['.', '!', '?', '\n'];

/// One stage drives every turn, so text and speech deltas for a turn are
/// serialized; there is no parallelism within a turn.
pub(crate) async fn run(
    agent: Arc<dyn ConversationAgent>,
    tts: Arc<dyn TextToSpeech>,
    mut transcripts: mpsc::Receiver<Segment>,
    events: mpsc::Sender<Event>,
    shutdown: Shutdown,
) {
    debug!("agent driver stage started");
    while !shutdown.is_triggered() {
        let segment = match timeout(POLL_TIMEOUT, transcripts.recv()).await {
            Err(_) => continue,
            Ok(Some(segment)) => segment,
            Ok(None) => break,
        };

        info!("processing transcript: {}", segment.transcript);
        if let Err(e) = respond_turn(agent.as_ref(), tts.as_ref(), &segment, &events).await {
            warn!("assistant turn aborted: {:#}", e);
        }
        // Brackets always close, failure or not, so the client can
        // recover its UI state.
        push_or_drop(&events, Event::new(EventKind::ResponseTextEnd), "events");
        push_or_drop(&events, Event::new(EventKind::ResponseSpeechEnd), "events");
    }
    debug!("agent driver stage stopped");
}

async fn respond_turn(
    agent: &dyn ConversationAgent,
    tts: &dyn TextToSpeech,
    segment: &Segment,
    events: &mpsc::Sender<Event>,
) -> Result<()> {
    push_or_drop(
        events,
        Event::with_content(EventKind::TranscriptText, segment.transcript.as_str())
            .at(segment.timestamp),
        "events",
    );

    let mut stream = agent
        .generate_stream(&segment.transcript)
        .await
        .context("agent request failed")?;

    let mut buffer = String::new();
    let mut text_started = false;
    let mut speech_started = false;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("agent stream failed")?;
        buffer.push_str(&chunk);

        if !text_started {
            push_or_drop(events, Event::new(EventKind::ResponseTextStart), "events");
            text_started = true;
        }

        if let Some((sentence, rest)) = split_at_last_boundary(&buffer) {
            let sentence = sentence.to_string();
            buffer = rest.to_string();
            speak(tts, events, &sentence, &mut speech_started).await?;
        }
    }

    // Whatever trails the last boundary still gets spoken.
    if !buffer.trim().is_empty() {
        speak(tts, events, &buffer, &mut speech_started).await?;
    }

    Ok(())
}

/// Send the sentence text, then stream its synthesized audio.
async fn speak(
    tts: &dyn TextToSpeech,
    events: &mpsc::Sender<Event>,
    text: &str,
    speech_started: &mut bool,
) -> Result<()> {
    if !*speech_started {
        push_or_drop(events, Event::new(EventKind::ResponseSpeechStart), "events");
        *speech_started = true;
    }
    push_or_drop(
        events,
        Event::with_content(EventKind::ResponseTextDelta, text),
        "events",
    );

    let mut pcm = tts.tts_stream(text).await.context("tts request failed")?;
    while let Some(chunk) = pcm.next().await {
        let chunk = chunk.context("tts stream failed")?;
        let encoded = BASE64.encode(i16_to_bytes(&chunk));
        push_or_drop(
            events,
            Event::with_content(EventKind::ResponseSpeechDelta, encoded),
            "events",
        );
    }
    Ok(())
}

/// Split after the rightmost sentence ending, returning the complete text
/// and the remainder. All boundary characters are single-byte.
fn split_at_last_boundary(text: &str) -> Option<(&str, &str)> {
    let idx = text.rfind(&SENTENCE_ENDINGS[..])?;
    Some(text.split_at(idx + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_uses_rightmost_boundary() {
        let (complete, rest) = split_at_last_boundary("Hi there! How").unwrap();
        assert_eq!(complete, "Hi there!");
        assert_eq!(rest, " How");

        let (complete, rest) = split_at_last_boundary("One. Two? Three").unwrap();
        assert_eq!(complete, "One. Two?");
        assert_eq!(rest, " Three");
    }

    #[test]
    fn test_split_handles_every_ending() {
        for ending in ['.', '!', '?', '\n'] {
            let text = format!("hello{}world", ending);
            let (complete, rest) = split_at_last_boundary(&text).unwrap();
            assert_eq!(complete, format!("hello{}", ending));
            assert_eq!(rest, "world");
        }
    }

    #[test]
    fn test_no_boundary_means_no_split() {
        assert!(split_at_last_boundary("still going").is_none());
        assert!(split_at_last_boundary("").is_none());
    }

    #[test]
    fn test_split_then_concat_reconstructs_input() {
        // Splitting repeatedly and concatenating the pieces is lossless.
        let inputs = [
            "Hi there! How are you? I'm fine.\nGreat",
            "no boundaries here",
            "...",
            "a.b.c.d",
        ];
        for input in inputs {
            let mut pieces = Vec::new();
            let mut rest = input.to_string();
            while let Some((complete, tail)) = split_at_last_boundary(&rest) {
                let complete = complete.to_string();
                rest = tail.to_string();
                pieces.push(complete);
            }
            pieces.push(rest);
            assert_eq!(pieces.concat(), input);
        }
    }
}
