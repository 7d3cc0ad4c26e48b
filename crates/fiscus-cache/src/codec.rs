//! # Integrity & Compression Codec
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Codec Pipeline                                  │
//! │                                                                         │
//! │   serde_json::Value                                                    │
//! │        │  canonical_bytes()  (sorted object keys)                      │
//! │        ▼                                                                │
//! │   canonical bytes ──────────────► checksum() ──► sha256 | crc32        │
//! │        │                                                                │
//! │        │  compress()  (only when size ≥ compression_threshold)         │
//! │        ▼                                                                │
//! │   Compressed { encoded, original_size, encoded_size }                  │
//! │        │                                                                │
//! │        └── kept only if encoded_size < original_size                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The compressor is pluggable through [`Codec`]. [`DeflateCodec`] is a real
//! lossless DEFLATE stream: round trips are exact, but it makes no promise of
//! shrinking a payload, which is why the store compares sizes before keeping
//! the encoded form.

use std::fmt;
use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use fiscus_core::{Checksum, ChecksumAlgorithm};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{CacheError, CacheResult};

// =============================================================================
// Codec Trait
// =============================================================================

/// A reversible byte transform.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Short name recorded in logs.
    fn name(&self) -> &'static str;

    fn encode(&self, bytes: &[u8]) -> CacheResult<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> CacheResult<Vec<u8>>;
}

/// DEFLATE (RFC 1951) via flate2.
#[derive(Debug, Clone, Copy)]
pub struct DeflateCodec {
    level: u32,
}

impl DeflateCodec {
    /// Creates a codec with the given level (0-9).
    pub fn new(level: u32) -> Self {
        DeflateCodec {
            level: level.min(9),
        }
    }
}

impl Default for DeflateCodec {
    fn default() -> Self {
        DeflateCodec::new(6)
    }
}

impl Codec for DeflateCodec {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn encode(&self, bytes: &[u8]) -> CacheResult<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(self.level));
        encoder.write_all(bytes)?;
        Ok(encoder.finish()?)
    }

    fn decode(&self, bytes: &[u8]) -> CacheResult<Vec<u8>> {
        let mut decoder = DeflateDecoder::new(bytes);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}

// =============================================================================
// Value Encoding
// =============================================================================

/// Output of [`compress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compressed {
    pub encoded: Vec<u8>,
    pub original_size: u64,
    pub encoded_size: u64,
}

impl Compressed {
    /// Returns true if keeping the encoded form actually saves space.
    pub fn is_worthwhile(&self) -> bool {
        self.encoded_size < self.original_size
    }
}

/// Serializes a value to its canonical byte form.
///
/// Object keys come out sorted, so equal values always produce equal bytes.
pub fn canonical_bytes(value: &Value) -> CacheResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Compresses the canonical form of `value`.
pub fn compress(codec: &dyn Codec, value: &Value) -> CacheResult<Compressed> {
    let bytes = canonical_bytes(value)?;
    compress_bytes(codec, &bytes)
}

/// Compresses bytes that are already in canonical form.
pub fn compress_bytes(codec: &dyn Codec, bytes: &[u8]) -> CacheResult<Compressed> {
    let encoded = codec.encode(bytes)?;
    Ok(Compressed {
        original_size: bytes.len() as u64,
        encoded_size: encoded.len() as u64,
        encoded,
    })
}

/// Inverse of [`compress`]. Malformed input is an error the caller must
/// treat as corruption.
pub fn decompress(codec: &dyn Codec, encoded: &[u8]) -> CacheResult<Value> {
    let bytes = codec.decode(encoded)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Like [`decompress`], but checks the decoded bytes against `expected`
/// before parsing them.
pub fn decompress_verified(
    codec: &dyn Codec,
    encoded: &[u8],
    expected: Option<&Checksum>,
) -> CacheResult<Value> {
    let bytes = codec.decode(encoded)?;
    if let Some(expected) = expected {
        if !verify(expected, &bytes) {
            return Err(mismatch(expected));
        }
    }
    Ok(serde_json::from_slice(&bytes)?)
}

// =============================================================================
// Checksums
// =============================================================================

/// Computes a digest of `bytes` with the requested algorithm.
pub fn checksum(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> Checksum {
    let digest = match algorithm {
        ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
        ChecksumAlgorithm::Crc32 => format!("{:08x}", crc32fast::hash(bytes)),
    };
    Checksum { algorithm, digest }
}

/// Checks `bytes` against a stored checksum, using the algorithm recorded in it.
pub fn verify(expected: &Checksum, bytes: &[u8]) -> bool {
    checksum(expected.algorithm, bytes).digest == expected.digest
}

/// Checks a decoded value against a stored checksum.
pub fn verify_value(expected: &Checksum, value: &Value) -> CacheResult<()> {
    let bytes = canonical_bytes(value)?;
    if verify(expected, &bytes) {
        Ok(())
    } else {
        Err(mismatch(expected))
    }
}

fn mismatch(expected: &Checksum) -> CacheError {
    CacheError::Codec(format!("{} checksum mismatch", expected.algorithm))
}

// =============================================================================
// Unit Tests
// =============================================================================
