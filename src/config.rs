//! Environment-sourced configuration.
//!
//! Everything is read from the process environment once at startup:
//! provider credentials and models, server binding, CORS origins, and the
//! per-connection pipeline tunables.

use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::pipeline::types::PipelineConfig;

/// OpenAI-compatible API hosts the adapters can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Groq,
}

impl ProviderKind {
    pub fn base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Groq => "https://api.groq.com/openai/v1",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "groq" => Some(ProviderKind::Groq),
            _ => None,
        }
    }
}

/// Process-wide settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Comma-separated CORS origins, `*` for any.
    pub allowed_origins: String,

    pub openai_api_key: Option<String>,
    pub groq_api_key: Option<String>,

    pub stt_provider: ProviderKind,
    pub stt_model: String,
    pub stt_language: String,

    pub tts_model: String,
    pub tts_voice: String,
    pub tts_instructions: String,

    pub agent_provider: ProviderKind,
    pub agent_model: String,
    pub agent_temperature: f32,

    /// Local Silero VAD model path; downloaded when unset.
    pub vad_model_path: Option<PathBuf>,

    pub pipeline: PipelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            allowed_origins: "*".to_string(),
            openai_api_key: None,
            groq_api_key: None,
            stt_provider: ProviderKind::Groq,
            stt_model: "whisper-large-v3-turbo".to_string(),
            stt_language: "en".to_string(),
            tts_model: "gpt-4o-mini-tts".to_string(),
            tts_voice: "alloy".to_string(),
            tts_instructions: "Speak in a cheerful and positive tone.".to_string(),
            agent_provider: ProviderKind::Groq,
            agent_model: "openai/gpt-oss-120b".to_string(),
            agent_temperature: 0.2,
            vad_model_path: None,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Read settings from the process environment, falling back to the
    /// defaults above for anything unset.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        let base = defaults.pipeline;

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parsed("PORT", defaults.port),
            log_level: var("LOG_LEVEL").unwrap_or(defaults.log_level),
            allowed_origins: var("ALLOWED_ORIGINS").unwrap_or(defaults.allowed_origins),
            openai_api_key: var("OPENAI_API_KEY"),
            groq_api_key: var("GROQ_API_KEY"),
            stt_provider: provider("STT_PROVIDER", defaults.stt_provider),
            stt_model: var("STT_MODEL").unwrap_or(defaults.stt_model),
            stt_language: var("STT_LANGUAGE").unwrap_or(defaults.stt_language),
            tts_model: var("TTS_MODEL").unwrap_or(defaults.tts_model),
            tts_voice: var("TTS_VOICE").unwrap_or(defaults.tts_voice),
            tts_instructions: var("TTS_INSTRUCTIONS").unwrap_or(defaults.tts_instructions),
            agent_provider: provider("AGENT_PROVIDER", defaults.agent_provider),
            agent_model: var("AGENT_MODEL").unwrap_or(defaults.agent_model),
            agent_temperature: parsed("AGENT_TEMPERATURE", defaults.agent_temperature),
            vad_model_path: var("VAD_MODEL_PATH").map(PathBuf::from),
            pipeline: PipelineConfig {
                received_audio_sample_rate: parsed(
                    "RECEIVED_AUDIO_SAMPLE_RATE",
                    base.received_audio_sample_rate,
                ),
                audio_sample_rate: parsed("AUDIO_SAMPLE_RATE", base.audio_sample_rate),
                speech_pad_ms: parsed("SPEECH_PAD_MS", base.speech_pad_ms),
                min_silence_ms: parsed("MIN_SILENCE_MS", base.min_silence_ms),
                min_speech_s: parsed("MIN_SPEECH_S", base.min_speech_s),
                max_speech_s: parsed("MAX_SPEECH_S", base.max_speech_s),
                opening_prompt: var("OPENING_PROMPT"),
                ..base
            },
        }
    }

    /// The credential for an API host, if configured.
    pub fn api_key(&self, provider: ProviderKind) -> Result<String> {
        let key = match provider {
            ProviderKind::OpenAi => self.openai_api_key.as_ref(),
            ProviderKind::Groq => self.groq_api_key.as_ref(),
        };
        match key {
            Some(key) => Ok(key.clone()),
            None => bail!(
                "missing API key for {:?}; set {} in the environment",
                provider,
                match provider {
                    ProviderKind::OpenAi => "OPENAI_API_KEY",
                    ProviderKind::Groq => "GROQ_API_KEY",
                }
            ),
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    var(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn provider(name: &str, default: ProviderKind) -> ProviderKind {
    var(name)
        .and_then(|v| ProviderKind::parse(&v))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.stt_provider, ProviderKind::Groq);
        assert_eq!(config.pipeline.received_audio_sample_rate, 48_000);
        assert!(config.pipeline.opening_prompt.is_none());
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(ProviderKind::parse("OpenAI"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::parse("groq"), Some(ProviderKind::Groq));
        assert_eq!(ProviderKind::parse("azure"), None);
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let config = Config::default();
        assert!(config.api_key(ProviderKind::OpenAi).is_err());

        let config = Config {
            openai_api_key: Some("sk-test".to_string()),
            ..Config::default()
        };
        assert_eq!(config.api_key(ProviderKind::OpenAi).unwrap(), "sk-test");
    }
}
