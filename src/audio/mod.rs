//! PCM conversion helpers shared across the audio path.
//!
//! Everything on the wire is mono little-endian signed-16 PCM; the VAD
//! model wants normalized f32 and the STT providers want a WAV container.

pub mod resample;

use std::io::Cursor;

use anyhow::{Context, Result};

/// Interpret raw little-endian bytes as s16 samples.
///
/// A trailing odd byte (which a well-formed frame never has) is dropped.
pub fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Serialize s16 samples back to little-endian bytes.
pub fn i16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

/// Convert s16 PCM to f32 normalized to [-1.0, 1.0].
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Build a mono 16-bit WAV file in memory from raw samples.
pub fn wav_from_samples(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .context("failed to create in-memory WAV writer")?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize().context("failed to finalize WAV buffer")?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_sample_round_trip() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN, 12345];
        assert_eq!(bytes_to_i16(&i16_to_bytes(&samples)), samples);
    }

    #[test]
    fn test_odd_trailing_byte_dropped() {
        let bytes = vec![0x34, 0x12, 0xff];
        assert_eq!(bytes_to_i16(&bytes), vec![0x1234]);
    }

    #[test]
    fn test_i16_to_f32_range() {
        let converted = i16_to_f32(&[0, i16::MAX, i16::MIN]);
        assert!((converted[0] - 0.0).abs() < 1e-6);
        assert!((converted[1] - 0.99997).abs() < 1e-4);
        assert!((converted[2] - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_wav_header_and_length() {
        let samples = vec![100i16; 160];
        let wav = wav_from_samples(&samples, 16000).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte canonical header plus two bytes per sample
        assert_eq!(wav.len(), 44 + samples.len() * 2);
    }
}
