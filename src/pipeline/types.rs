//! Core pipeline data types and the client wire format.

use anyhow::{bail, Result};
use serde::Deserialize;

/// Binary frame header length: big-endian u16 flag + u64 timestamp in ms.
pub const FRAME_HEADER_BYTES: usize = 10;

/// Per-connection pipeline tuning. Immutable once the pipeline is built.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Length of the binary frame header.
    pub header_bytes: usize,
    /// Sample rate of client audio (Hz). Must be an integer multiple of
    /// `audio_sample_rate`.
    pub received_audio_sample_rate: u32,
    /// Sample rate the VAD and STT models operate at (Hz).
    pub audio_sample_rate: u32,
    /// Padding applied around detected speech.
    pub speech_pad_ms: u32,
    /// Silence after speech that closes an utterance.
    pub min_silence_ms: u32,
    /// Shortest buffer worth scanning for speech, in seconds.
    pub min_speech_s: f64,
    /// Buffer cap; hitting it forces a flush, in seconds.
    pub max_speech_s: f64,
    /// When set, a synthetic transcribed segment with this text is seeded
    /// at startup so the assistant speaks first.
    pub opening_prompt: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            header_bytes: FRAME_HEADER_BYTES,
            received_audio_sample_rate: 48_000,
            audio_sample_rate: 16_000,
            speech_pad_ms: 100,
            min_silence_ms: 500,
            min_speech_s: 0.5,
            max_speech_s: 20.0,
            opening_prompt: None,
        }
    }
}

impl PipelineConfig {
    pub fn min_speech_samples(&self) -> usize {
        (self.min_speech_s * self.audio_sample_rate as f64) as usize
    }

    pub fn max_speech_samples(&self) -> usize {
        (self.max_speech_s * self.audio_sample_rate as f64) as usize
    }

    pub fn min_silence_samples(&self) -> usize {
        self.min_silence_ms as usize * self.audio_sample_rate as usize / 1000
    }
}

/// One client audio packet, as parsed off the wire.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Client metadata, opaque to the pipeline.
    pub flag: u16,
    /// Capture time, seconds since the Unix epoch.
    pub timestamp: f64,
    /// Raw little-endian s16 PCM at the client sample rate.
    pub payload: Vec<u8>,
}

impl AudioFrame {
    /// Parse a binary frame: a big-endian `(u16 flag, u64 timestamp_ms)`
    /// header followed by the PCM payload.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < FRAME_HEADER_BYTES {
            bail!(
                "binary frame shorter than the {}-byte header: {} bytes",
                FRAME_HEADER_BYTES,
                raw.len()
            );
        }

        let flag = u16::from_be_bytes([raw[0], raw[1]]);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&raw[2..10]);
        let timestamp_ms = u64::from_be_bytes(ts);

        Ok(Self {
            flag,
            timestamp: timestamp_ms as f64 / 1000.0,
            payload: raw[FRAME_HEADER_BYTES..].to_vec(),
        })
    }
}

/// An utterance moving through the pipeline. Owned by exactly one stage
/// at a time; ownership transfers with the queue handoff.
#[derive(Debug, Clone, Default)]
pub struct Segment {
    /// Timestamp of the first frame that contributed to the utterance.
    pub timestamp: f64,
    /// s16 PCM at the model sample rate. Cleared after transcription to
    /// reclaim memory.
    pub samples: Vec<i16>,
    /// Filled by the transcriber stage.
    pub transcript: String,
}

impl Segment {
    /// A freshly detected utterance awaiting transcription.
    pub fn speech(timestamp: f64, samples: Vec<i16>) -> Self {
        Self {
            timestamp,
            samples,
            transcript: String::new(),
        }
    }

    /// An already-transcribed segment, used for warm-up seeding.
    pub fn transcribed(timestamp: f64, transcript: impl Into<String>) -> Self {
        Self {
            timestamp,
            samples: Vec::new(),
            transcript: transcript.into(),
        }
    }
}

/// Control messages the client sends as JSON text.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// The client started playing assistant audio; suppress barge-in.
    #[serde(rename = "tts_start")]
    TtsStart,
    /// Client-side playback finished.
    #[serde(rename = "tts_end")]
    TtsEnd,
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_frame(flag: u16, timestamp_ms: u64, payload: &[u8]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(FRAME_HEADER_BYTES + payload.len());
        raw.extend_from_slice(&flag.to_be_bytes());
        raw.extend_from_slice(&timestamp_ms.to_be_bytes());
        raw.extend_from_slice(payload);
        raw
    }

    #[test]
    fn test_frame_parse_round_trip() {
        let cases: [(u16, u64, Vec<u8>); 4] = [
            (0, 0, vec![]),
            (1, 1_700_000_000_123, vec![0xab; 960]),
            (u16::MAX, u64::MAX / 1000, vec![1, 2, 3, 4]),
            (42, 1_234, vec![0; 2]),
        ];

        for (flag, ts_ms, payload) in cases {
            let frame = AudioFrame::parse(&encode_frame(flag, ts_ms, &payload)).unwrap();
            assert_eq!(frame.flag, flag);
            assert!((frame.timestamp - ts_ms as f64 / 1000.0).abs() < 1e-9);
            assert_eq!(frame.payload, payload);
        }
    }

    #[test]
    fn test_short_frames_rejected() {
        for len in 0..FRAME_HEADER_BYTES {
            assert!(AudioFrame::parse(&vec![0u8; len]).is_err(), "len = {}", len);
        }
        // Exactly the header is a valid (empty-payload) frame.
        assert!(AudioFrame::parse(&vec![0u8; FRAME_HEADER_BYTES]).is_ok());
    }

    #[test]
    fn test_control_message_parsing() {
        let start: ControlMessage = serde_json::from_str(r#"{"type":"tts_start"}"#).unwrap();
        assert_eq!(start, ControlMessage::TtsStart);

        // Unknown fields are ignored.
        let end: ControlMessage =
            serde_json::from_str(r#"{"type":"tts_end","volume":0.5}"#).unwrap();
        assert_eq!(end, ControlMessage::TtsEnd);

        let other: ControlMessage = serde_json::from_str(r#"{"type":"mystery"}"#).unwrap();
        assert_eq!(other, ControlMessage::Unknown);
    }

    #[test]
    fn test_sample_thresholds() {
        let config = PipelineConfig::default();
        assert_eq!(config.min_speech_samples(), 8_000);
        assert_eq!(config.max_speech_samples(), 320_000);
        assert_eq!(config.min_silence_samples(), 8_000);
    }
}
