//! Whisper-style transcription over OpenAI-compatible endpoints.
//!
//! Both supported hosts (OpenAI, Groq) expose the same
//! `/audio/transcriptions` shape: a multipart upload with a WAV file and
//! a model name. Neither streams partial results for whisper models, so
//! the adapter yields the full transcript as a single chunk.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use super::{SpeechToText, TextStream};
use crate::audio::wav_from_samples;
use crate::config::{Config, ProviderKind};

/// Transcription client for OpenAI-compatible whisper endpoints.
pub struct WhisperStt {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    language: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl WhisperStt {
    pub fn new(
        provider: ProviderKind,
        api_key: String,
        model: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: provider.base_url().to_string(),
            api_key,
            model: model.into(),
            language: language.into(),
        }
    }

    /// Build from settings; missing credentials fail construction.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.api_key(config.stt_provider)?;
        Ok(Self::new(
            config.stt_provider,
            api_key,
            config.stt_model.clone(),
            config.stt_language.clone(),
        ))
    }

    async fn transcribe(&self, samples: &[i16], sample_rate: u32) -> Result<String> {
        let wav = wav_from_samples(samples, sample_rate)?;
        debug!("uploading {} bytes of WAV for transcription", wav.len());

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .context("invalid WAV mime type")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("failed to send transcription request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("transcription API error ({}): {}", status, body);
        }

        let transcription: TranscriptionResponse = response
            .json()
            .await
            .context("failed to parse transcription response")?;
        Ok(transcription.text)
    }
}

#[async_trait]
impl SpeechToText for WhisperStt {
    async fn stt_stream(&self, samples: Vec<i16>, sample_rate: u32) -> Result<TextStream> {
        // Whisper endpoints return the transcript in one shot; a
        // single-chunk stream keeps the delta contract intact.
        let text = self.transcribe(&samples, sample_rate).await?;
        Ok(futures::stream::once(async move { Ok(text) }).boxed())
    }
}
