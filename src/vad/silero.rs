//! Silero VAD over ONNX Runtime.
//!
//! Wraps the Silero VAD v5 model published at
//! <https://github.com/snakers4/silero-vad>. The model scores 512-sample
//! windows (32 ms at 16 kHz) with a recurrent hidden state; this module
//! walks a whole utterance buffer window by window and converts the
//! probability sequence into padded speech spans.
//!
//! The model file (~2 MB) is auto-downloaded to the data directory on
//! first use. Load failure is fatal at construction time.

use std::path::PathBuf;

use anyhow::{Context, Result};
use ort::session::Session;
use tracing::{debug, info};

use super::{SpeechDetector, SpeechSpan};
use crate::audio::i16_to_f32;

const SILERO_VAD_URL: &str =
    "https://github.com/snakers4/silero-vad/raw/master/src/silero_vad/data/silero_vad.onnx";
const MODEL_FILENAME: &str = "silero_vad.onnx";
const SAMPLE_RATE: i64 = 16000;
/// Window size the model scores per inference (32ms at 16kHz).
const WINDOW_SIZE: usize = 512;

/// Detection tuning for [`SileroVad`].
#[derive(Debug, Clone, Copy)]
pub struct SileroParams {
    /// Speech probability threshold in [0, 1].
    pub threshold: f32,
    /// Shortest run of speech reported as a span.
    pub min_speech_ms: u32,
    /// Silence shorter than this is absorbed into the surrounding span.
    pub min_silence_ms: u32,
    /// Padding added on both sides of every span.
    pub speech_pad_ms: u32,
}

impl Default for SileroParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_speech_ms: 250,
            min_silence_ms: 100,
            speech_pad_ms: 100,
        }
    }
}

impl SileroParams {
    fn samples(&self, ms: u32) -> usize {
        ms as usize * (SAMPLE_RATE as usize / 1000)
    }
}

/// Silero VAD wrapper using ONNX Runtime.
pub struct SileroVad {
    session: Session,
    /// Recurrent state tensor (2, 1, 128), reset before each buffer scan.
    state: Vec<f32>,
    params: SileroParams,
}

impl SileroVad {
    /// Load the model from `model_path`, downloading the published model
    /// to the data directory when no path is given.
    pub fn load(model_path: Option<PathBuf>, params: SileroParams) -> Result<Self> {
        let path = match model_path {
            Some(path) => path,
            None => Self::ensure_model()?,
        };

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(&path)
            .context("failed to create ONNX session for Silero VAD")?;

        info!("Silero VAD loaded from {}", path.display());

        Ok(Self {
            session,
            state: vec![0.0f32; 2 * 1 * 128],
            params,
        })
    }

    /// Ensure the ONNX model file exists, downloading if needed.
    fn ensure_model() -> Result<PathBuf> {
        let model_dir = dirs::data_dir()
            .context("no data directory available for model storage")?
            .join("voxserve/models");
        std::fs::create_dir_all(&model_dir).context("failed to create models directory")?;

        let model_path = model_dir.join(MODEL_FILENAME);
        if model_path.exists() {
            return Ok(model_path);
        }

        info!("downloading Silero VAD model to {}", model_path.display());

        let response =
            reqwest::blocking::get(SILERO_VAD_URL).context("failed to download Silero VAD model")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "failed to download Silero VAD model: HTTP {}",
                response.status()
            );
        }

        let bytes = response
            .bytes()
            .context("failed to read Silero VAD model bytes")?;

        std::fs::write(&model_path, &bytes).context("failed to save Silero VAD model")?;

        info!("Silero VAD model downloaded ({} bytes)", bytes.len());
        Ok(model_path)
    }

    /// Run inference over one 512-sample window, returning the speech
    /// probability. Audio must be f32 normalized to [-1.0, 1.0] at 16 kHz.
    fn run_inference(&mut self, audio: &[f32]) -> Result<f32> {
        use ort::value::Value;

        let input = Value::from_array(([1usize, audio.len()], audio.to_vec()))?;
        let state = Value::from_array(([2usize, 1usize, 128usize], self.state.clone()))?;
        let sr = Value::from_array(([1usize], vec![SAMPLE_RATE]))?;

        let outputs = self.session.run(ort::inputs![input, state, sr])?;

        let (_prob_shape, prob_data) = outputs[0].try_extract_tensor::<f32>()?;
        let prob = prob_data.first().copied().unwrap_or(0.0);

        let (_state_shape, new_state) = outputs[1].try_extract_tensor::<f32>()?;
        if new_state.len() == self.state.len() {
            self.state.copy_from_slice(new_state);
        }

        Ok(prob)
    }

    fn reset_state(&mut self) {
        self.state.fill(0.0);
    }
}

impl SpeechDetector for SileroVad {
    fn speech_spans(&mut self, samples: &[i16]) -> Result<Vec<SpeechSpan>> {
        // Each scan covers a whole buffer, so the recurrent state from the
        // previous scan must not leak in.
        self.reset_state();

        let audio = i16_to_f32(samples);
        let mut probs = Vec::with_capacity(audio.len().div_ceil(WINDOW_SIZE));
        for chunk in audio.chunks(WINDOW_SIZE) {
            let prob = if chunk.len() == WINDOW_SIZE {
                self.run_inference(chunk)?
            } else {
                let mut padded = chunk.to_vec();
                padded.resize(WINDOW_SIZE, 0.0);
                self.run_inference(&padded)?
            };
            probs.push(prob);
        }

        let spans = spans_from_probs(&probs, WINDOW_SIZE, samples.len(), &self.params);
        debug!(
            "vad scan: {} samples, {} windows, {} spans",
            samples.len(),
            probs.len(),
            spans.len()
        );
        Ok(spans)
    }
}

/// Convert a per-window probability sequence into padded speech spans.
///
/// Follows the reference Silero post-processing: a span opens when the
/// probability crosses `threshold` and closes once it stays below
/// `threshold - 0.15` for at least `min_silence_ms`. Runs shorter than
/// `min_speech_ms` are discarded; survivors are padded by `speech_pad_ms`
/// and merged where the padding makes them touch.
fn spans_from_probs(
    probs: &[f32],
    window: usize,
    total_samples: usize,
    params: &SileroParams,
) -> Vec<SpeechSpan> {
    let min_speech = params.samples(params.min_speech_ms);
    let min_silence = params.samples(params.min_silence_ms);
    let pad = params.samples(params.speech_pad_ms);
    let neg_threshold = (params.threshold - 0.15).max(0.01);

    let mut raw: Vec<SpeechSpan> = Vec::new();
    let mut triggered = false;
    let mut start = 0usize;
    let mut temp_end: Option<usize> = None;

    for (i, &prob) in probs.iter().enumerate() {
        let pos = i * window;
        if prob >= params.threshold {
            temp_end = None;
            if !triggered {
                triggered = true;
                start = pos;
            }
        } else if triggered && prob < neg_threshold {
            let end = *temp_end.get_or_insert(pos);
            if pos + window - end >= min_silence {
                if end - start >= min_speech {
                    raw.push(SpeechSpan { start, end });
                }
                triggered = false;
                temp_end = None;
            }
        }
    }
    if triggered {
        let end = temp_end.unwrap_or(total_samples).min(total_samples);
        if end - start >= min_speech {
            raw.push(SpeechSpan { start, end });
        }
    }

    let mut spans: Vec<SpeechSpan> = Vec::new();
    for span in raw {
        let padded = SpeechSpan {
            start: span.start.saturating_sub(pad),
            end: (span.end + pad).min(total_samples),
        };
        match spans.last_mut() {
            Some(prev) if padded.start <= prev.end => prev.end = prev.end.max(padded.end),
            _ => spans.push(padded),
        }
    }
    spans
}
