//! Voice activity detection.
//!
//! The segmenter consumes speech spans through the [`SpeechDetector`]
//! capability contract; [`silero::SileroVad`] is the production backend.

pub mod segmenter;
pub mod silero;

use anyhow::Result;

/// A detected run of speech within a sample buffer, padding already applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSpan {
    /// First sample index of the span (inclusive).
    pub start: usize,
    /// One past the last sample index of the span (exclusive).
    pub end: usize,
}

impl SpeechSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Capability contract for a VAD backend.
///
/// Implementations report padded speech spans over a whole buffer of s16
/// PCM at the model sample rate. Spans are non-overlapping and sorted.
pub trait SpeechDetector: Send {
    fn speech_spans(&mut self, samples: &[i16]) -> Result<Vec<SpeechSpan>>;
}
