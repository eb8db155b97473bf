//! HTTP/WebSocket accept layer.
//!
//! A thin axum app: a JSON greeting at `/` and the realtime voice
//! WebSocket at `/ws`. The Silero VAD model is loaded once at startup
//! and shared across connections; a load failure is fatal here, before
//! any client connects.

pub mod voice_ws;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::vad::silero::{SileroParams, SileroVad};
use crate::vad::SpeechDetector;

/// Shared server state.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    /// Shared VAD singleton; the mutex guards the model's recurrent
    /// state during inference.
    pub detector: Arc<Mutex<dyn SpeechDetector>>,
}

/// Start the voice server and serve until the process is stopped.
pub async fn start(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid host/port configuration")?;

    // Model download and ONNX session setup block; keep them off the
    // runtime threads. Failure here declines startup entirely.
    let model_path = config.vad_model_path.clone();
    let params = SileroParams {
        speech_pad_ms: config.pipeline.speech_pad_ms,
        ..SileroParams::default()
    };
    let detector = tokio::task::spawn_blocking(move || SileroVad::load(model_path, params))
        .await
        .context("VAD model load task failed")??;

    let cors = cors_layer(&config.allowed_origins);
    let state = ServerState {
        config: Arc::new(config),
        detector: Arc::new(Mutex::new(detector)),
    };

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(voice_ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("voice server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind server address")?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Realtime AI voice chat server",
        "websocket": "/ws",
    }))
}

/// CORS policy from the comma-separated origin list; `*` allows any.
fn cors_layer(allowed_origins: &str) -> CorsLayer {
    if allowed_origins.trim() == "*" {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_accepts_wildcard_and_lists() {
        // Only exercising that parsing does not panic on either shape.
        let _ = cors_layer("*");
        let _ = cors_layer("http://localhost:3000, https://example.com");
        let _ = cors_layer("");
    }
}
