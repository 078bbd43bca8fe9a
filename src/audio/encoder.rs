//! # Sample Encoding
//!
//! Converts normalized float frames into the bytes sent over the socket.
//!
//! ## Conversion:
//! Samples are clamped to [-1.0, 1.0], then scaled asymmetrically:
//! negative values by 32768 and non-negative values by 32767. This keeps both
//! ends of the range exactly representable (`-1.0 → -32768`, `1.0 → 32767`).
//!
//! ## Transport Framing:
//! - **Pcm16**: Raw little-endian samples, no header (the canonical wire format)
//! - **Wav**: Each frame wrapped in its own RIFF/WAV container

use crate::audio::frame::AudioFrame;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// How encoded frames are framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportFormat {
    #[default]
    Pcm16,
    Wav,
}

/// 16-bit little-endian PCM bytes, two per input sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame(Vec<u8>);

impl EncodedFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of samples carried.
    pub fn sample_count(&self) -> usize {
        self.0.len() / 2
    }

    /// Read the samples back as signed integers.
    pub fn to_pcm(&self) -> Vec<i16> {
        let mut pcm = vec![0i16; self.sample_count()];
        LittleEndian::read_i16_into(&self.0[..pcm.len() * 2], &mut pcm);
        pcm
    }
}

/// Stateless float → PCM encoder.
#[derive(Debug, Clone, Copy)]
pub struct SampleEncoder {
    format: TransportFormat,
}

impl SampleEncoder {
    pub fn new(format: TransportFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> TransportFormat {
        self.format
    }

    /// Encode a frame into `2 * frame.len()` bytes.
    pub fn encode(&self, frame: &AudioFrame) -> EncodedFrame {
        let mut bytes = vec![0u8; frame.len() * 2];
        for (chunk, &sample) in bytes.chunks_exact_mut(2).zip(frame.samples()) {
            LittleEndian::write_i16(chunk, encode_sample(sample));
        }
        EncodedFrame(bytes)
    }

    /// Encode a frame and apply the configured transport framing.
    pub fn payload(&self, frame: &AudioFrame) -> std::io::Result<Vec<u8>> {
        let encoded = self.encode(frame);
        match self.format {
            TransportFormat::Pcm16 => Ok(encoded.into_bytes()),
            TransportFormat::Wav => wrap_wav(&encoded, frame.sample_rate()),
        }
    }
}

impl Default for SampleEncoder {
    fn default() -> Self {
        Self::new(TransportFormat::Pcm16)
    }
}

/// Convert one normalized sample to signed 16-bit PCM.
///
/// NaN maps to silence.
pub fn encode_sample(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0).round() as i16
    } else {
        (s * 32767.0).round() as i16
    }
}

/// Inverse of [`encode_sample`], using the same asymmetric scale.
pub fn decode_sample(pcm: i16) -> f32 {
    if pcm < 0 {
        pcm as f32 / 32768.0
    } else {
        pcm as f32 / 32767.0
    }
}

/// Wrap an encoded mono frame in a WAV container.
pub fn wrap_wav(encoded: &EncodedFrame, sample_rate: u32) -> std::io::Result<Vec<u8>> {
    let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, sample_rate, 16);
    let track = wav::BitDepth::Sixteen(encoded.to_pcm());

    let mut cursor = Cursor::new(Vec::with_capacity(encoded.len() + 44));
    wav::write(header, &track, &mut cursor)?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extremes_do_not_wrap() {
        assert_eq!(encode_sample(1.0), 32767);
        assert_eq!(encode_sample(-1.0), -32768);
        assert_eq!(encode_sample(0.0), 0);
        // Out-of-range input is clamped, not wrapped
        assert_eq!(encode_sample(1.7), 32767);
        assert_eq!(encode_sample(-3.0), -32768);
        assert_eq!(encode_sample(f32::NAN), 0);
    }

    #[test]
    fn test_asymmetric_rounding() {
        assert_eq!(encode_sample(0.5), 16384); // 16383.5 rounds away from zero
        assert_eq!(encode_sample(-0.5), -16384);
        assert_eq!(encode_sample(0.25), 8192); // 8191.75
    }

    #[test]
    fn test_round_trip_within_one_step() {
        let step = 1.0 / 32767.0;
        let mut s = -1.0f32;
        while s <= 1.0 {
            let back = decode_sample(encode_sample(s));
            assert!((back - s).abs() <= step, "sample {} decoded as {}", s, back);
            s += 0.0037;
        }
        assert_eq!(decode_sample(encode_sample(1.0)), 1.0);
        assert_eq!(decode_sample(encode_sample(-1.0)), -1.0);
    }

    #[test]
    fn test_byte_layout_little_endian() {
        let frame = AudioFrame::new(vec![1.0, -1.0, 0.0], 16000, 0);
        let encoded = SampleEncoder::default().encode(&frame);

        assert_eq!(encoded.len(), 6);
        assert_eq!(encoded.as_bytes(), &[0xFF, 0x7F, 0x00, 0x80, 0x00, 0x00]);
        assert_eq!(encoded.to_pcm(), vec![32767, -32768, 0]);
    }

    #[test]
    fn test_wav_payload_has_riff_header() {
        let frame = AudioFrame::new(vec![0.25; 160], 16000, 0);
        let payload = SampleEncoder::new(TransportFormat::Wav).payload(&frame).unwrap();

        assert_eq!(&payload[0..4], b"RIFF");
        assert_eq!(&payload[8..12], b"WAVE");

        let (header, data) = wav::read(&mut Cursor::new(payload)).unwrap();
        assert_eq!(header.sampling_rate, 16000);
        assert_eq!(header.channel_count, 1);
        assert_eq!(data.as_sixteen().map(|s| s.len()), Some(160));
    }
}
