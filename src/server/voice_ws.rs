//! Realtime voice WebSocket endpoint.
//!
//! Bridges one client socket to one [`VoicePipeline`]: the socket halves
//! are wrapped as the pipeline's channel source and sink, and the
//! STT/TTS/agent collaborators are built from configuration before the
//! upgrade so that missing credentials decline the connection instead of
//! failing mid-conversation.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info};

use super::ServerState;
use crate::pipeline::{ChannelSink, ChannelSource, ClientMessage, VoicePipeline};
use crate::providers::agent::ChatAgent;
use crate::providers::stt::WhisperStt;
use crate::providers::tts::OpenAiTts;
use crate::providers::{ConversationAgent, SpeechToText, TextToSpeech};

struct Providers {
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    agent: Arc<dyn ConversationAgent>,
}

fn build_providers(state: &ServerState) -> Result<Providers> {
    let config = &state.config;
    Ok(Providers {
        stt: Arc::new(WhisperStt::from_config(config).context("STT unavailable")?),
        tts: Arc::new(OpenAiTts::from_config(config).context("TTS unavailable")?),
        agent: Arc::new(ChatAgent::from_config(config).context("agent unavailable")?),
    })
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    let providers = match build_providers(&state) {
        Ok(providers) => providers,
        Err(e) => {
            error!("refusing voice connection: {:#}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, format!("{:#}", e)).into_response();
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, providers))
}

async fn handle_socket(socket: WebSocket, state: ServerState, providers: Providers) {
    info!("voice websocket connected");

    let (sender, receiver) = socket.split();
    let pipeline = match VoicePipeline::new(
        state.config.pipeline.clone(),
        SocketSource(receiver),
        SocketSink(sender),
        state.detector.clone(),
        providers.stt,
        providers.tts,
        providers.agent,
    ) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("failed to build voice pipeline: {:#}", e);
            return;
        }
    };

    if let Err(e) = pipeline.run().await {
        error!("voice pipeline error: {:#}", e);
    }
    info!("voice websocket disconnected");
}

struct SocketSource(SplitStream<WebSocket>);

#[async_trait]
impl ChannelSource for SocketSource {
    async fn recv(&mut self) -> Result<Option<ClientMessage>> {
        loop {
            return match self.0.next().await {
                None => Ok(None),
                Some(Err(e)) => Err(anyhow!(e).context("websocket receive failed")),
                Some(Ok(Message::Binary(data))) => Ok(Some(ClientMessage::Binary(data.to_vec()))),
                Some(Ok(Message::Text(text))) => Ok(Some(ClientMessage::Text(text.to_string()))),
                Some(Ok(Message::Close(_))) => Ok(None),
                // Ping/pong are handled by axum itself.
                Some(Ok(_)) => continue,
            };
        }
    }
}

struct SocketSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl ChannelSink for SocketSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.0
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| anyhow!(e).context("websocket send failed"))
    }
}
