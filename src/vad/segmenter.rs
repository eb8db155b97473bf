//! Utterance segmentation over a growing PCM buffer.
//!
//! Each incoming frame is resampled to the model rate and appended to an
//! internal buffer. Once the buffer holds enough audio, the whole buffer
//! is scanned for speech spans and a small state machine decides whether
//! an utterance is complete:
//!
//! - no speech and the buffer at capacity: slide the window, keeping the
//!   trailing 90% so a late onset is not lost;
//! - speech followed by enough trailing silence: the utterance is done;
//! - speech with the buffer at capacity: force a flush so latency stays
//!   bounded even when the speaker never pauses.
//!
//! Resampling and VAD inference run on blocking workers gated by a
//! two-permit semaphore, keeping the stage itself non-blocking.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{SpeechDetector, SpeechSpan};
use crate::audio::resample::Downsampler;
use crate::pipeline::types::{AudioFrame, PipelineConfig, Segment};

/// Blocking-worker slots shared by resampling and VAD inference.
pub const WORKER_SLOTS: usize = 2;

/// Fraction of the buffer kept when sliding the window under sustained
/// non-speech input.
const SLIDE_KEEP_RATIO: f64 = 0.9;

/// Streaming speech segmenter. One per connection.
pub struct VadSegmenter {
    downsampler: Arc<Downsampler>,
    detector: Arc<Mutex<dyn SpeechDetector>>,
    workers: Arc<Semaphore>,
    /// Accumulated s16 PCM at the model sample rate.
    buffer: Vec<i16>,
    /// Timestamp of the earliest frame still represented in the buffer.
    buffer_timestamp: f64,
    min_speech_samples: usize,
    max_speech_samples: usize,
    min_silence_samples: usize,
}

impl VadSegmenter {
    pub fn new(
        config: &PipelineConfig,
        detector: Arc<Mutex<dyn SpeechDetector>>,
    ) -> Result<Self> {
        let downsampler = Downsampler::new(
            config.received_audio_sample_rate,
            config.audio_sample_rate,
        )
        .context("invalid sample-rate configuration")?;

        Ok(Self {
            downsampler: Arc::new(downsampler),
            detector,
            workers: Arc::new(Semaphore::new(WORKER_SLOTS)),
            buffer: Vec::new(),
            buffer_timestamp: 0.0,
            min_speech_samples: config.min_speech_samples(),
            max_speech_samples: config.max_speech_samples(),
            min_silence_samples: config.min_silence_samples(),
        })
    }

    /// Number of samples currently buffered.
    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one frame; returns a finished utterance when one is ready.
    ///
    /// Any failure flushes the buffer before propagating, so a bad frame
    /// cannot wedge every frame after it.
    pub async fn process_frame(&mut self, frame: AudioFrame) -> Result<Option<Segment>> {
        match self.advance(frame).await {
            Ok(segment) => Ok(segment),
            Err(e) => {
                self.buffer.clear();
                Err(e)
            }
        }
    }

    async fn advance(&mut self, frame: AudioFrame) -> Result<Option<Segment>> {
        let resampled = self.resample(frame.payload).await?;
        if self.buffer.is_empty() {
            self.buffer_timestamp = frame.timestamp;
        }
        self.buffer.extend_from_slice(&resampled);

        // Not enough audio to meaningfully run the detector yet.
        if self.buffer.len() < self.min_speech_samples {
            return Ok(None);
        }

        let spans = self.detect().await?;
        let buffer_full = self.buffer.len() >= self.max_speech_samples;

        let Some(&last) = spans.last() else {
            if buffer_full {
                let keep = (self.buffer.len() as f64 * SLIDE_KEEP_RATIO) as usize;
                self.buffer.drain(..self.buffer.len() - keep);
                self.buffer_timestamp = frame.timestamp;
                debug!("no speech at buffer capacity, slid window to {} samples", keep);
            }
            return Ok(None);
        };
        let first = spans[0];

        let mut speech = Vec::with_capacity(spans.iter().map(SpeechSpan::len).sum());
        for span in &spans {
            speech.extend_from_slice(&self.buffer[span.start..span.end]);
        }

        let trailing_silence = self.buffer.len() - last.end;
        if trailing_silence >= self.min_silence_samples {
            // The speaker paused: keep the trailing silence for the next
            // utterance and hand off everything up to the last speech end.
            self.buffer.drain(..last.end);
            let timestamp = self.take_timestamp(frame.timestamp);
            debug!(
                "utterance complete: {} speech samples, {} trailing",
                speech.len(),
                trailing_silence
            );
            return Ok(Some(Segment::speech(timestamp, speech)));
        }

        if buffer_full {
            // The cap was hit mid-speech. Flush what we have; when the
            // whole buffer is speech, trimming to the first span start
            // would retain everything, so drop it all to guarantee
            // forward progress.
            if first.start == 0 {
                self.buffer.clear();
            } else {
                self.buffer.drain(..first.start);
            }
            let timestamp = self.take_timestamp(frame.timestamp);
            warn!("buffer at capacity mid-speech, forcing flush of {} samples", speech.len());
            return Ok(Some(Segment::speech(timestamp, speech)));
        }

        // Still hearing the speaker.
        Ok(None)
    }

    /// Timestamp for the emitted segment; the retained tail belongs to
    /// the current frame onwards.
    fn take_timestamp(&mut self, current: f64) -> f64 {
        let timestamp = self.buffer_timestamp;
        self.buffer_timestamp = current;
        timestamp
    }

    async fn resample(&self, payload: Vec<u8>) -> Result<Vec<i16>> {
        let downsampler = self.downsampler.clone();
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .context("worker pool closed")?;

        let resampled = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            downsampler.process_bytes(&payload)
        })
        .await
        .context("resample worker failed")?;

        Ok(resampled)
    }

    async fn detect(&self) -> Result<Vec<SpeechSpan>> {
        let detector = self.detector.clone();
        let samples = self.buffer.clone();
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .context("worker pool closed")?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut detector = detector.lock().unwrap_or_else(|e| e.into_inner());
            detector.speech_spans(&samples)
        })
        .await
        .context("vad worker failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted detector: reports the contiguous run of loud samples as a
    /// single span, or a configurable failure.
    struct LoudnessDetector {
        fail: bool,
    }

    impl SpeechDetector for LoudnessDetector {
        fn speech_spans(&mut self, samples: &[i16]) -> Result<Vec<SpeechSpan>> {
            if self.fail {
                anyhow::bail!("scripted detector failure");
            }
            let loud: Vec<usize> = samples
                .iter()
                .enumerate()
                .filter(|(_, &s)| s.unsigned_abs() > 2000)
                .map(|(i, _)| i)
                .collect();
            Ok(match (loud.first(), loud.last()) {
                (Some(&start), Some(&end)) => vec![SpeechSpan { start, end: end + 1 }],
                _ => Vec::new(),
            })
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            received_audio_sample_rate: 48_000,
            audio_sample_rate: 16_000,
            min_speech_s: 0.5,
            max_speech_s: 2.0, // small cap keeps the tests fast
            ..PipelineConfig::default()
        }
    }

    fn segmenter(fail: bool) -> VadSegmenter {
        VadSegmenter::new(&config(), Arc::new(Mutex::new(LoudnessDetector { fail }))).unwrap()
    }

    /// A 20ms frame at 48kHz with every sample set to `level`.
    fn frame(level: i16, timestamp: f64) -> AudioFrame {
        AudioFrame {
            flag: 0,
            timestamp,
            payload: crate::audio::i16_to_bytes(&vec![level; 960]),
        }
    }

    #[tokio::test]
    async fn test_silence_never_emits() {
        let mut seg = segmenter(false);
        for i in 0..100 {
            let out = seg.process_frame(frame(0, i as f64 * 0.02)).await.unwrap();
            assert!(out.is_none());
        }
    }

    #[tokio::test]
    async fn test_silence_slides_window_at_capacity() {
        let mut seg = segmenter(false);
        let max = 2 * 16_000;
        // 2s of silence at 320 model samples per frame fills the buffer.
        for i in 0..120 {
            seg.process_frame(frame(0, i as f64 * 0.02)).await.unwrap();
            assert!(seg.buffered_samples() <= max, "buffer exceeded cap");
        }
        // The window slid back to 90% of capacity at least once.
        assert!(seg.buffered_samples() < max);
        assert!(seg.buffered_samples() >= (max as f64 * 0.8) as usize);
    }

    #[tokio::test]
    async fn test_utterance_closed_by_trailing_silence() {
        let mut seg = segmenter(false);
        let mut emitted = None;

        // 1s of speech, then silence until the 500ms gate opens.
        for i in 0..50 {
            assert!(seg
                .process_frame(frame(10_000, i as f64 * 0.02))
                .await
                .unwrap()
                .is_none());
        }
        for i in 50..90 {
            if let Some(segment) = seg.process_frame(frame(0, i as f64 * 0.02)).await.unwrap() {
                emitted = Some(segment);
                break;
            }
        }

        let segment = emitted.expect("trailing silence should close the utterance");
        assert_eq!(segment.timestamp, 0.0);
        assert!(segment.transcript.is_empty());
        // Roughly the 1s of speech (16k samples), modulo filter edges.
        assert!(segment.samples.len() > 14_000 && segment.samples.len() < 18_000);
        // Trailing silence stays buffered for the next utterance.
        assert!(seg.buffered_samples() > 0);
    }

    #[tokio::test]
    async fn test_continuous_speech_forces_flush() {
        let mut seg = segmenter(false);
        let mut flushed = None;

        // Nonstop speech well past the 2s cap.
        for i in 0..150 {
            if let Some(segment) = seg
                .process_frame(frame(10_000, i as f64 * 0.02))
                .await
                .unwrap()
            {
                flushed = Some((i, segment));
                break;
            }
        }

        let (at_frame, segment) = flushed.expect("the cap should force a flush");
        assert!(at_frame >= 99, "flush should not fire before the cap");
        assert!(segment.samples.len() >= 2 * 16_000 - 320);
        // The whole buffer was speech, so it was dropped entirely.
        assert_eq!(seg.buffered_samples(), 0);
    }

    #[tokio::test]
    async fn test_detector_error_flushes_buffer() {
        let mut seg = segmenter(true);
        for i in 0..30 {
            let result = seg.process_frame(frame(10_000, i as f64 * 0.02)).await;
            if seg.buffered_samples() >= 8_000 {
                break;
            }
            assert!(result.is_ok(), "below the scan threshold nothing fails");
        }
        // The next frame crosses the scan threshold and the failure resets
        // the buffer.
        let result = seg.process_frame(frame(10_000, 1.0)).await;
        assert!(result.is_err() || seg.buffered_samples() < 8_000);
        if result.is_err() {
            assert_eq!(seg.buffered_samples(), 0);
        }
    }
}
