//! Little-endian 16-bit PCM <-> bytes <-> base64 conversions.
//!
//! Audio travels over the wire as base64 of little-endian `i16` samples. A
//! standalone recording is always 16 kHz mono.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::protocol::DecodeError;

/// Sampling rate of every recording submitted by the client.
pub const SAMPLE_RATE: u32 = 16_000;

/// Serialize samples as little-endian bytes.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian bytes into samples. An odd byte count is rejected.
pub fn le_bytes_to_samples(bytes: &[u8]) -> Result<Vec<i16>, DecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::Audio(format!(
            "odd PCM byte length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

pub fn samples_to_base64(samples: &[i16]) -> String {
    STANDARD.encode(samples_to_le_bytes(samples))
}

pub fn base64_to_samples(encoded: &str) -> Result<Vec<i16>, DecodeError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| DecodeError::Audio(format!("invalid base64: {e}")))?;
    le_bytes_to_samples(&bytes)
}

/// `#[serde(with = ...)]` adapter storing `Vec<i16>` as a base64 string.
pub mod base64_samples {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(samples: &[i16], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::samples_to_base64(samples))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<i16>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        super::base64_to_samples(&encoded).map_err(serde::de::Error::custom)
    }
}
