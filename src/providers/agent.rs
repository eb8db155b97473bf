//! OpenAI-compatible chat agent with SSE streaming.
//!
//! One agent instance lives for the duration of a connection and keeps
//! the rolling conversation history, so each turn sees what came before.
//! Replies stream as server-sent events parsed straight off the byte
//! stream.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{ConversationAgent, TextStream};
use crate::config::{Config, ProviderKind};

/// System prompt for spoken conversation; responses are read aloud, so
/// no markdown or lists.
const SYSTEM_PROMPT: &str = "You are a helpful AI assistant in a real-time voice conversation. \
Keep responses concise and conversational - aim for one to three sentences unless the user asks \
for detail. Speak naturally as if on a phone call. Do not use markdown, bullet points, or code \
blocks - your responses will be spoken aloud.";

/// Messages kept in the rolling history, system prompt excluded.
const HISTORY_LIMIT: usize = 40;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self { role: "system", content: content.into() }
    }

    fn user(content: impl Into<String>) -> Self {
        Self { role: "user", content: content.into() }
    }

    fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant", content: content.into() }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Streaming chat client for OpenAI-compatible `/chat/completions`.
pub struct ChatAgent {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    system_prompt: String,
    history: Arc<Mutex<Vec<ChatMessage>>>,
}

impl ChatAgent {
    pub fn new(provider: ProviderKind, api_key: String, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: provider.base_url().to_string(),
            api_key,
            model: model.into(),
            temperature: 0.2,
            system_prompt: SYSTEM_PROMPT.to_string(),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Build from settings; missing credentials fail construction.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.api_key(config.agent_provider)?;
        let mut agent = Self::new(config.agent_provider, api_key, config.agent_model.clone());
        agent.temperature = config.agent_temperature;
        Ok(agent)
    }
}

#[async_trait]
impl ConversationAgent for ChatAgent {
    async fn generate_stream(&self, message: &str) -> Result<TextStream> {
        let messages = {
            let mut history = self.history.lock().await;
            history.push(ChatMessage::user(message.trim()));
            // Old turns fall off the front; the system prompt is prepended
            // per request and never counts against the limit.
            if history.len() > HISTORY_LIMIT {
                let excess = history.len() - HISTORY_LIMIT;
                history.drain(..excess);
            }
            let mut messages = Vec::with_capacity(history.len() + 1);
            messages.push(ChatMessage::system(self.system_prompt.clone()));
            messages.extend(history.iter().cloned());
            messages
        };

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("failed to send chat request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("chat API error ({}): {}", status, body);
        }

        let (tx, rx) = mpsc::channel::<Result<String>>(32);
        let history = self.history.clone();
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut full = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("chat stream interrupted: {}", e);
                        let _ = tx
                            .send(Err(anyhow::Error::new(e).context("chat stream failed")))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE events are separated by a blank line.
                while let Some(pos) = buffer.find("\n\n") {
                    let event = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);
                    for delta in deltas_from_sse(&event) {
                        full.push_str(&delta);
                        if tx.send(Ok(delta)).await.is_err() {
                            return;
                        }
                    }
                }
            }

            let reply = full.trim();
            if !reply.is_empty() {
                debug!("agent reply complete ({} chars)", reply.len());
                history.lock().await.push(ChatMessage::assistant(reply));
            }
        });

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

/// Extract content deltas from one SSE event block.
fn deltas_from_sse(event: &str) -> Vec<String> {
    let mut deltas = Vec::new();
    for line in event.lines() {
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data == "[DONE]" {
            continue;
        }
        if let Ok(response) = serde_json::from_str::<StreamResponse>(data) {
            if let Some(content) = response.choices.first().and_then(|c| c.delta.content.clone()) {
                if !content.is_empty() {
                    deltas.push(content);
                }
            }
        }
    }
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_extraction() {
        let event = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(deltas_from_sse(event), vec!["Hello".to_string()]);
    }

    #[test]
    fn test_done_marker_ignored() {
        assert!(deltas_from_sse("data: [DONE]").is_empty());
    }

    #[test]
    fn test_empty_and_missing_content_skipped() {
        assert!(deltas_from_sse(r#"data: {"choices":[{"delta":{}}]}"#).is_empty());
        assert!(deltas_from_sse(r#"data: {"choices":[{"delta":{"content":""}}]}"#).is_empty());
        assert!(deltas_from_sse(r#"data: {"choices":[]}"#).is_empty());
    }

    #[test]
    fn test_non_data_lines_skipped() {
        let event = ": keepalive\nevent: message\ndata: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}";
        assert_eq!(deltas_from_sse(event), vec!["x".to_string()]);
    }

    #[test]
    fn test_malformed_json_skipped() {
        assert!(deltas_from_sse("data: {not json").is_empty());
    }
}
