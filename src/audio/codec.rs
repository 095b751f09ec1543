//! PCM codec helpers for the live session wire format
//!
//! The service consumes and produces raw 16-bit little-endian PCM wrapped in
//! base64. These are fixed-format conversions: f32 samples from the capture
//! side become PCM16 base64 for the wire, and inbound base64 PCM16 becomes
//! f32 samples for the playback queue.

use base64::{engine::general_purpose::STANDARD, Engine};

/// Errors that can occur while decoding wire audio.
#[derive(Debug, Clone)]
pub enum CodecError {
    /// The base64 payload could not be decoded
    InvalidBase64(String),
    /// The decoded byte stream has an odd length (PCM16 needs 2 bytes/sample)
    TruncatedSample(usize),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::InvalidBase64(e) => write!(f, "Invalid base64 audio payload: {}", e),
            CodecError::TruncatedSample(len) => {
                write!(f, "PCM16 payload has odd byte length {}", len)
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Convert an f32 sample in [-1.0, 1.0] to i16, clamping out-of-range values.
pub fn f32_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

/// Encode i16 samples as base64 PCM16 LE for the wire.
pub fn encode_pcm16_base64(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|&s| s.to_le_bytes()).collect();
    STANDARD.encode(&bytes)
}

/// Decode a base64 PCM16 LE payload into f32 samples in [-1.0, 1.0).
pub fn decode_pcm16_base64(data: &str) -> Result<Vec<f32>, CodecError> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;

    if bytes.len() % 2 != 0 {
        return Err(CodecError::TruncatedSample(bytes.len()));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| {
            let value = i16::from_le_bytes([pair[0], pair[1]]);
            value as f32 / 32768.0
        })
        .collect();

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(-1.0), -i16::MAX);

        // Out-of-range values are clamped
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
    }

    #[test]
    fn test_encode_is_little_endian() {
        let encoded = encode_pcm16_base64(&[0x1234, 0x5678]);
        let decoded = STANDARD.decode(&encoded).unwrap();

        // 0x1234 -> [0x34, 0x12], 0x5678 -> [0x78, 0x56]
        assert_eq!(decoded, vec![0x34, 0x12, 0x78, 0x56]);
    }

    #[test]
    fn test_decode_pcm16() {
        let bytes: Vec<u8> = vec![0x00, 0x00, 0xFF, 0x7F, 0x00, 0x80];
        let encoded = STANDARD.encode(&bytes);

        let samples = decode_pcm16_base64(&encoded).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0.0);
        assert!((samples[1] - (32767.0 / 32768.0)).abs() < f32::EPSILON);
        assert_eq!(samples[2], -1.0);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = decode_pcm16_base64("not!!valid!!").unwrap_err();
        assert!(matches!(err, CodecError::InvalidBase64(_)));
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        let encoded = STANDARD.encode([0x00u8, 0x01, 0x02]);
        let err = decode_pcm16_base64(&encoded).unwrap_err();
        assert!(matches!(err, CodecError::TruncatedSample(3)));
    }
}
