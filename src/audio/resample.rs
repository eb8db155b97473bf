//! Integer-factor downsampling with an anti-alias low-pass filter.
//!
//! Client audio arrives at the browser capture rate (typically 48 kHz)
//! while the VAD and STT models run at 16 kHz. The rates are required to
//! divide exactly, so the conversion is a classic polyphase decimator: a
//! windowed-sinc low-pass at the post-decimation Nyquist, evaluated only
//! at the retained output positions.
//!
//! Each call is stateless; edges are zero-padded, so for an input of `n`
//! samples the output always has `ceil(n / factor)` samples.

use std::f32::consts::PI;

use anyhow::{bail, Result};

use super::bytes_to_i16;

/// Low-pass taps per polyphase branch on each side of center.
const TAPS_PER_BRANCH: usize = 10;

/// Fixed-ratio PCM downsampler.
pub struct Downsampler {
    factor: usize,
    /// Symmetric windowed-sinc taps, normalized to unit DC gain.
    taps: Vec<f32>,
}

impl Downsampler {
    /// Build a downsampler from `input_rate` Hz to `output_rate` Hz.
    ///
    /// Fails unless `input_rate` is a positive integer multiple of
    /// `output_rate`.
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        if output_rate == 0 || input_rate % output_rate != 0 {
            bail!(
                "input rate {} Hz is not an integer multiple of output rate {} Hz",
                input_rate,
                output_rate
            );
        }

        let factor = (input_rate / output_rate) as usize;
        Ok(Self {
            factor,
            taps: design_lowpass(factor),
        })
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Number of output samples produced for `n` input samples.
    pub fn output_len(&self, n: usize) -> usize {
        n.div_ceil(self.factor)
    }

    /// Downsample one frame of raw little-endian s16 PCM bytes.
    pub fn process_bytes(&self, pcm: &[u8]) -> Vec<i16> {
        self.process(&bytes_to_i16(pcm))
    }

    /// Downsample one frame of s16 samples.
    pub fn process(&self, input: &[i16]) -> Vec<i16> {
        let out_len = self.output_len(input.len());

        if self.factor == 1 {
            return input.to_vec();
        }

        // Silent frames skip the filter entirely.
        if input.iter().all(|&s| s == 0) {
            return vec![0i16; out_len];
        }

        let half = self.taps.len() / 2;
        let mut output = Vec::with_capacity(out_len);
        for k in 0..out_len {
            let center = (k * self.factor) as isize;
            let mut acc = 0.0f32;
            for (i, &tap) in self.taps.iter().enumerate() {
                let idx = center + i as isize - half as isize;
                if idx >= 0 && (idx as usize) < input.len() {
                    acc += tap * input[idx as usize] as f32;
                }
            }
            output.push(acc.clamp(-32768.0, 32767.0) as i16);
        }
        output
    }
}

/// Windowed-sinc low-pass with cutoff at the post-decimation Nyquist.
fn design_lowpass(factor: usize) -> Vec<f32> {
    let half = TAPS_PER_BRANCH * factor;
    let len = 2 * half + 1;
    // Cutoff in cycles per input sample.
    let cutoff = 0.5 / factor as f32;

    let mut taps = Vec::with_capacity(len);
    for n in 0..len {
        let m = n as f32 - half as f32;
        let sinc = if m == 0.0 {
            2.0 * cutoff
        } else {
            (2.0 * PI * cutoff * m).sin() / (PI * m)
        };
        // Hamming window
        let window = 0.54 - 0.46 * (2.0 * PI * n as f32 / (len - 1) as f32).cos();
        taps.push(sinc * window);
    }

    let gain: f32 = taps.iter().sum();
    taps.iter().map(|t| t / gain).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_fractional_ratio() {
        assert!(Downsampler::new(44_100, 16_000).is_err());
        assert!(Downsampler::new(48_000, 0).is_err());
        assert!(Downsampler::new(48_000, 16_000).is_ok());
    }

    #[test]
    fn test_output_length_is_ceil() {
        let ds = Downsampler::new(48_000, 16_000).unwrap();
        for n in [0usize, 1, 2, 3, 299, 300, 301, 960, 961] {
            let input = vec![1000i16; n];
            assert_eq!(ds.process(&input).len(), n.div_ceil(3), "n = {}", n);
        }
    }

    #[test]
    fn test_silence_short_circuits_to_zeros() {
        let ds = Downsampler::new(48_000, 16_000).unwrap();
        let output = ds.process(&vec![0i16; 960]);
        assert_eq!(output.len(), 320);
        assert!(output.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_dc_level_preserved() {
        let ds = Downsampler::new(48_000, 16_000).unwrap();
        let input = vec![10_000i16; 4800];
        let output = ds.process(&input);
        // Away from the zero-padded edges the DC level passes through the
        // unit-gain low-pass unchanged.
        let mid = &output[output.len() / 4..output.len() * 3 / 4];
        for &s in mid {
            assert!((s - 10_000).abs() < 50, "sample {} drifted", s);
        }
    }

    #[test]
    fn test_extremes_are_clamped() {
        let ds = Downsampler::new(32_000, 16_000).unwrap();
        let input = vec![i16::MIN; 640];
        for s in ds.process(&input) {
            assert!((i16::MIN..=i16::MAX).contains(&s));
        }
    }

    #[test]
    fn test_unity_factor_is_passthrough() {
        let ds = Downsampler::new(16_000, 16_000).unwrap();
        let input = vec![7i16, -7, 100, -100];
        assert_eq!(ds.process(&input), input);
    }
}
