//! Voxserve - Realtime full-duplex AI voice conversation server.
//!
//! A client streams microphone audio over a WebSocket; the server
//! detects speech, transcribes it, generates an assistant reply, and
//! streams text and speech deltas back with low latency.
//!
//! The core is the staged pipeline in [`pipeline`]: ingest, VAD
//! segmentation, streaming STT, the LLM-backed agent driver with
//! sentence-interleaved TTS, and the event multiplexer. The STT, TTS,
//! and agent collaborators live behind the capability traits in
//! [`providers`].

pub mod audio;
pub mod cli;
pub mod config;
pub mod pipeline;
pub mod providers;
pub mod server;
pub mod vad;

// Re-export the types most callers need.
pub use config::Config;
pub use pipeline::VoicePipeline;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
