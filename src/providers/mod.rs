//! Capability contracts for the external collaborators.
//!
//! The pipeline depends only on these three traits. STT, TTS, and the
//! agent are capability sets, not a class hierarchy; picking a concrete
//! provider is a configuration concern handled by the accept layer.

pub mod agent;
pub mod stt;
pub mod tts;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// A stream of text chunks.
pub type TextStream = BoxStream<'static, Result<String>>;

/// A stream of s16 PCM buffers.
pub type PcmStream = BoxStream<'static, Result<Vec<i16>>>;

/// Speech-to-text over one finished utterance.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Stream transcript chunks for the given audio. Backends without
    /// native streaming yield the full transcript as a single chunk, so
    /// the start/delta/end ordering holds either way.
    async fn stt_stream(&self, samples: Vec<i16>, sample_rate: u32) -> Result<TextStream>;
}

/// Text-to-speech synthesis.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Stream synthesized PCM for the given text. Chunks are whole s16
    /// samples at `sample_rate()`.
    async fn tts_stream(&self, text: &str) -> Result<PcmStream>;

    /// Native output rate of the synthesized audio.
    fn sample_rate(&self) -> u32;
}

/// The LLM-backed conversation agent.
#[async_trait]
pub trait ConversationAgent: Send + Sync {
    /// Stream the assistant reply for one user turn. The pipeline does
    /// not interpret the chunks beyond sentence segmentation.
    async fn generate_stream(&self, message: &str) -> Result<TextStream>;
}
