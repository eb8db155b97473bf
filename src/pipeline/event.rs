//! Typed events streamed back to the client.
//!
//! Wire shape is `{"type": ..., "timestamp": ..., "content": ...?}`, with
//! `content` present only when non-empty.

use serde::Serialize;

/// Event names on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    #[serde(rename = "user.transcript.start")]
    TranscriptStart,
    #[serde(rename = "user.transcript.text.delta")]
    TranscriptTextDelta,
    #[serde(rename = "user.transcript.end")]
    TranscriptEnd,
    /// Full transcript of one utterance.
    #[serde(rename = "user.transcript.text")]
    TranscriptText,
    #[serde(rename = "ai.response.text.start")]
    ResponseTextStart,
    #[serde(rename = "ai.response.text.delta")]
    ResponseTextDelta,
    #[serde(rename = "ai.response.text.end")]
    ResponseTextEnd,
    #[serde(rename = "ai.response.speech.start")]
    ResponseSpeechStart,
    /// Base64 of raw little-endian s16 PCM at the TTS sample rate.
    #[serde(rename = "ai.response.speech.delta")]
    ResponseSpeechDelta,
    #[serde(rename = "ai.response.speech.end")]
    ResponseSpeechEnd,
}

/// One message to the client.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Seconds since the Unix epoch; server time unless overridden.
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: now_epoch_secs(),
            content: None,
        }
    }

    /// An event carrying text; empty content is omitted from the wire.
    pub fn with_content(kind: EventKind, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            kind,
            timestamp: now_epoch_secs(),
            content: (!content.is_empty()).then_some(content),
        }
    }

    /// Override the server timestamp, e.g. with the utterance capture time.
    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Seconds since the Unix epoch with sub-second precision.
pub fn now_epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_value(Event::new(EventKind::TranscriptStart).at(1.5)).unwrap();
        assert_eq!(json["type"], "user.transcript.start");
        assert_eq!(json["timestamp"], 1.5);

        let json =
            serde_json::to_value(Event::new(EventKind::ResponseSpeechDelta).at(0.0)).unwrap();
        assert_eq!(json["type"], "ai.response.speech.delta");
    }

    #[test]
    fn test_empty_content_omitted() {
        let json = serde_json::to_value(Event::new(EventKind::TranscriptEnd)).unwrap();
        assert!(json.get("content").is_none());

        let json = serde_json::to_value(Event::with_content(EventKind::TranscriptTextDelta, ""))
            .unwrap();
        assert!(json.get("content").is_none());

        let json = serde_json::to_value(Event::with_content(
            EventKind::TranscriptTextDelta,
            "hello",
        ))
        .unwrap();
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn test_server_timestamp_advances() {
        let a = Event::new(EventKind::ResponseTextStart);
        let b = Event::new(EventKind::ResponseTextEnd);
        assert!(b.timestamp >= a.timestamp);
        assert!(a.timestamp > 1_600_000_000.0);
    }
}
