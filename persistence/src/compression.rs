//! Compression and text-safe encoding for project payloads.
//!
//! zstd frames are self-delimiting but do not promise the caller the
//! decoded length, so decompression here always takes the expected length
//! out-of-band and verifies it. Base64 lives beside the compressor because
//! the two travel together: a payload is compressed, then text-encoded,
//! whenever a container has to pass through a text-only channel.

use std::io::Read;
use std::io::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::PersistenceError;
use crate::error::Result;

/// Hard ceiling on any declared uncompressed length (1 GiB).
///
/// Enforced before allocation, independent of what a header claims, so a
/// corrupted or hostile length field cannot trigger an unbounded
/// allocation.
pub const MAX_DECOMPRESSED_LEN: u64 = 1 << 30;

/// Compression level for zstd
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    /// Fast compression (level 1)
    Fast,
    /// Balanced compression (level 3)
    Balanced,
    /// Maximum compression (level 9)
    Maximum,
    /// Custom level (1-22)
    Custom(i32),
}

impl CompressionLevel {
    /// Convert to a zstd compression level
    #[must_use]
    pub const fn to_level(self) -> i32 {
        match self {
            Self::Fast => 1,
            Self::Balanced => 3,
            Self::Maximum => 9,
            Self::Custom(level) => {
                if level < 1 {
                    1
                } else if level > 22 {
                    22
                } else {
                    level
                }
            }
        }
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::Balanced
    }
}

/// zstd compressor for project payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct Compressor {
    level: CompressionLevel,
}

impl Compressor {
    /// Create a new compressor with the specified level
    #[must_use]
    pub const fn new(level: CompressionLevel) -> Self {
        Self { level }
    }

    /// Compress data into a self-delimiting zstd frame.
    ///
    /// The frame does not carry the original length for the caller; keep
    /// it out-of-band for [`Compressor::decompress_known_size`].
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = zstd::Encoder::new(Vec::new(), self.level.to_level())
            .map_err(|e| PersistenceError::Compression(e.to_string()))?;

        encoder
            .write_all(data)
            .map_err(|e| PersistenceError::Compression(e.to_string()))?;

        encoder
            .finish()
            .map_err(|e| PersistenceError::Compression(e.to_string()))
    }

    /// Decompress a frame whose decoded length the caller already knows.
    ///
    /// `declared_len` above [`MAX_DECOMPRESSED_LEN`] is rejected before
    /// any allocation. A frame that decodes to a different length than
    /// declared is reported as corruption even when the codec itself
    /// succeeded.
    pub fn decompress_known_size(&self, data: &[u8], declared_len: u64) -> Result<Vec<u8>> {
        if declared_len > MAX_DECOMPRESSED_LEN {
            return Err(PersistenceError::Corruption(format!(
                "declared uncompressed length {declared_len} exceeds the {MAX_DECOMPRESSED_LEN}-byte limit"
            )));
        }
        let capacity = usize::try_from(declared_len).map_err(|_| {
            PersistenceError::Corruption(format!(
                "declared uncompressed length {declared_len} does not fit this platform"
            ))
        })?;

        let decoder = zstd::Decoder::new(data)
            .map_err(|e| PersistenceError::Compression(e.to_string()))?;

        // Read at most one byte past the declared length; anything beyond
        // that is already a mismatch.
        let mut decompressed = Vec::with_capacity(capacity.saturating_add(1));
        decoder
            .take(declared_len.saturating_add(1))
            .read_to_end(&mut decompressed)
            .map_err(|e| PersistenceError::Compression(e.to_string()))?;

        if decompressed.len() as u64 != declared_len {
            return Err(PersistenceError::Corruption(format!(
                "decompressed {} bytes but {declared_len} were declared",
                decompressed.len()
            )));
        }
        Ok(decompressed)
    }
}

/// Encode bytes as standard base64 with `=` padding.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode standard base64, strictly.
///
/// Insignificant ASCII whitespace is ignored (the blob may have been
/// reflowed by its host document); everything else is canonical: the
/// length must be a multiple of four, `=` is legal only in the final two
/// positions of the final group, and any byte outside the 64-symbol
/// alphabet is rejected.
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    let compact: String = text
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\r' | '\n'))
        .collect();
    if compact.len() % 4 != 0 {
        return Err(PersistenceError::Corruption(
            "base64 length is not a multiple of four".to_string(),
        ));
    }
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| PersistenceError::Corruption(format!("invalid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_roundtrip() {
        let compressor = Compressor::default();
        let data = "glyph rows compress well when they repeat. ".repeat(64);
        let data = data.as_bytes();

        let compressed = compressor.compress(data).unwrap();
        assert!(compressed.len() < data.len());

        let decompressed = compressor
            .decompress_known_size(&compressed, data.len() as u64)
            .unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn compression_roundtrip_empty() {
        let compressor = Compressor::default();
        let compressed = compressor.compress(&[]).unwrap();
        let decompressed = compressor.decompress_known_size(&compressed, 0).unwrap();
        assert!(decompressed.is_empty());
    }

    #[test]
    fn declared_length_too_small_is_corruption() {
        let compressor = Compressor::default();
        let compressed = compressor.compress(&[7u8; 100]).unwrap();
        let err = compressor.decompress_known_size(&compressed, 99).unwrap_err();
        assert!(matches!(err, PersistenceError::Corruption(_)), "{err}");
    }

    #[test]
    fn declared_length_too_large_is_corruption() {
        let compressor = Compressor::default();
        let compressed = compressor.compress(&[7u8; 100]).unwrap();
        let err = compressor.decompress_known_size(&compressed, 101).unwrap_err();
        assert!(matches!(err, PersistenceError::Corruption(_)), "{err}");
    }

    #[test]
    fn oversized_declared_length_rejected_before_decoding() {
        let compressor = Compressor::default();
        let compressed = compressor.compress(&[0u8; 200]).unwrap();
        let err = compressor
            .decompress_known_size(&compressed, 1 << 31)
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Corruption(_)), "{err}");
    }

    #[test]
    fn garbage_frame_is_a_compression_error() {
        let compressor = Compressor::default();
        let err = compressor
            .decompress_known_size(b"not a zstd frame", 16)
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Compression(_)), "{err}");
    }

    #[test]
    fn base64_roundtrip_short_lengths() {
        for len in 0..=3 {
            let data: Vec<u8> = (0..len as u8).collect();
            let text = encode_base64(&data);
            assert_eq!(decode_base64(&text).unwrap(), data, "length {len}");
        }
    }

    #[test]
    fn base64_ignores_whitespace() {
        let data = b"phosphor";
        let text = encode_base64(data);
        let wrapped = format!(" {}\n\t{} \r\n", &text[..4], &text[4..]);
        assert_eq!(decode_base64(&wrapped).unwrap(), data);
    }

    #[test]
    fn base64_rejects_bad_length() {
        assert!(decode_base64("QUJ").is_err());
    }

    #[test]
    fn base64_rejects_misplaced_padding() {
        // '=' outside the final two positions of the final group.
        assert!(decode_base64("QU=Q").is_err());
        assert!(decode_base64("A===").is_err());
        assert!(decode_base64("====").is_err());
        assert!(decode_base64("QQ==QQ==").is_err());
    }

    #[test]
    fn base64_rejects_out_of_alphabet_bytes() {
        assert!(decode_base64("QUJ*").is_err());
        assert!(decode_base64("QUJD!A==").is_err());
    }

    #[test]
    fn base64_accepts_canonical_padding() {
        assert_eq!(decode_base64("QQ==").unwrap(), b"A");
        assert_eq!(decode_base64("QUI=").unwrap(), b"AB");
        assert_eq!(decode_base64("QUJD").unwrap(), b"ABC");
    }
}
