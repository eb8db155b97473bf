//! OpenAI speech synthesis streamed as raw PCM.
//!
//! The `/audio/speech` endpoint with `response_format=pcm` returns
//! headerless little-endian s16 PCM at 24 kHz. HTTP chunk boundaries do
//! not respect sample boundaries, so the byte stream is re-aligned: a
//! trailing odd byte is carried into the next chunk and zero-padded if
//! the stream ends on it.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::json;

use super::{PcmStream, TextToSpeech};
use crate::audio::bytes_to_i16;
use crate::config::{Config, ProviderKind};

/// Native sample rate of the OpenAI `pcm` response format.
pub const OPENAI_TTS_SAMPLE_RATE: u32 = 24_000;

/// Streaming TTS client for the OpenAI speech endpoint.
pub struct OpenAiTts {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    instructions: String,
}

impl OpenAiTts {
    pub fn new(api_key: String, model: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: ProviderKind::OpenAi.base_url().to_string(),
            api_key,
            model: model.into(),
            voice: voice.into(),
            instructions: String::new(),
        }
    }

    /// Build from settings; missing credentials fail construction.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.api_key(ProviderKind::OpenAi)?;
        let mut tts = Self::new(api_key, config.tts_model.clone(), config.tts_voice.clone());
        tts.instructions = config.tts_instructions.clone();
        Ok(tts)
    }
}

#[async_trait]
impl TextToSpeech for OpenAiTts {
    async fn tts_stream(&self, text: &str) -> Result<PcmStream> {
        let body = json!({
            "model": self.model,
            "voice": self.voice,
            "input": text,
            "instructions": self.instructions,
            "response_format": "pcm",
        });

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to send speech request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("speech API error ({}): {}", status, body);
        }

        Ok(aligned_pcm(response.bytes_stream().boxed()).boxed())
    }

    fn sample_rate(&self) -> u32 {
        OPENAI_TTS_SAMPLE_RATE
    }
}

struct AlignState<S> {
    inner: S,
    carry: Option<u8>,
    done: bool,
}

/// Re-chunk an arbitrary byte stream into whole s16 samples.
fn aligned_pcm<S, B, E>(bytes: S) -> impl Stream<Item = Result<Vec<i16>>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = AlignState {
        inner: bytes,
        carry: None,
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        loop {
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    let chunk = chunk.as_ref();
                    let mut buf = Vec::with_capacity(chunk.len() + 1);
                    if let Some(byte) = state.carry.take() {
                        buf.push(byte);
                    }
                    buf.extend_from_slice(chunk);
                    if buf.len() % 2 == 1 {
                        state.carry = buf.pop();
                    }
                    if buf.is_empty() {
                        continue;
                    }
                    return Some((Ok(bytes_to_i16(&buf)), state));
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((
                        Err(anyhow::Error::new(e).context("speech byte stream failed")),
                        state,
                    ));
                }
                None => {
                    state.done = true;
                    // A trailing odd byte is padded to a full sample.
                    if let Some(byte) = state.carry.take() {
                        return Some((Ok(vec![i16::from_le_bytes([byte, 0])]), state));
                    }
                    return None;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(chunks: Vec<Vec<u8>>) -> Vec<Vec<i16>> {
        let stream = futures::stream::iter(
            chunks
                .into_iter()
                .map(Ok::<_, std::io::Error>)
                .collect::<Vec<_>>(),
        );
        aligned_pcm(stream)
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_even_chunks_pass_through() {
        let out = collect(vec![vec![0x01, 0x00, 0x02, 0x00], vec![0x03, 0x00]]).await;
        assert_eq!(out, vec![vec![1i16, 2], vec![3]]);
    }

    #[tokio::test]
    async fn test_odd_byte_carries_into_next_chunk() {
        // First chunk ends mid-sample; the byte joins the next chunk.
        let out = collect(vec![vec![0x01, 0x00, 0x02], vec![0x00, 0x03, 0x00]]).await;
        assert_eq!(out, vec![vec![1i16], vec![2, 3]]);
    }

    #[tokio::test]
    async fn test_trailing_odd_byte_zero_padded() {
        let out = collect(vec![vec![0x01, 0x00, 0x7f]]).await;
        assert_eq!(out, vec![vec![1i16], vec![0x7f]]);
    }

    #[tokio::test]
    async fn test_single_byte_chunks_accumulate() {
        let out = collect(vec![vec![0x34], vec![0x12]]).await;
        assert_eq!(out, vec![vec![0x1234i16]]);
    }

    #[tokio::test]
    async fn test_stream_error_terminates() {
        let stream = futures::stream::iter(vec![
            Ok::<Vec<u8>, std::io::Error>(vec![0x01, 0x00]),
            Err(std::io::Error::other("connection reset")),
        ]);
        let results: Vec<_> = aligned_pcm(stream).collect().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
