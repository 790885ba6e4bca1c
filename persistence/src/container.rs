//! The project container: a fixed header wrapping a compressed document.
//!
//! File layout:
//!
//! ```text
//! Offset  Size  Field
//! 0       4     magic ("U8PZ")
//! 4       4     format version, little-endian u32
//! 8       8     uncompressed document length, little-endian u64
//! 16      ...   zstd-compressed document (MessagePack)
//! ```
//!
//! Files without the magic are pre-container legacy saves: the entire
//! byte stream is the uncompressed document.

use std::path::Path;

use phosphor_project::ProjectState;

use crate::CONTAINER_MAGIC;
use crate::CONTAINER_VERSION;
use crate::compression;
use crate::compression::Compressor;
use crate::document;
use crate::error::PersistenceError;
use crate::error::Result;
use crate::migration;
use crate::storage;

/// Header size in bytes (magic + version + uncompressed length).
pub const HEADER_LEN: usize = 4 + 4 + 8;

/// Serializes and compresses a whole project into container bytes.
pub fn encode_container(state: &ProjectState, compressor: &Compressor) -> Result<Vec<u8>> {
    let doc = document::to_document(state);
    let raw = document::encode_document(&doc)?;
    let compressed = compressor.compress(&raw)?;

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(CONTAINER_MAGIC);
    out.extend_from_slice(&CONTAINER_VERSION.to_le_bytes());
    out.extend_from_slice(&(raw.len() as u64).to_le_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decodes container bytes (either generation) back into a project.
pub fn decode_container(bytes: &[u8], compressor: &Compressor) -> Result<ProjectState> {
    let doc = if migration::has_container_header(bytes) {
        if bytes.len() < HEADER_LEN {
            return Err(PersistenceError::Format(
                "truncated container header".to_string(),
            ));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != CONTAINER_VERSION {
            return Err(PersistenceError::Format(format!(
                "unsupported container version {version}"
            )));
        }
        let declared_len = u64::from_le_bytes([
            bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
        ]);
        let raw = compressor.decompress_known_size(&bytes[HEADER_LEN..], declared_len)?;
        document::decode_document(&raw)?
    } else {
        // Pre-container legacy file: the whole stream is the document.
        document::decode_document(bytes)?
    };
    document::from_document(&doc)
}

/// Writes a project container to `path` atomically.
pub fn save_to_path(path: &Path, state: &ProjectState, compressor: &Compressor) -> Result<()> {
    let bytes = encode_container(state, compressor)?;
    storage::write_all_atomic(path, &bytes)
}

/// Reads and decodes a project container from `path`.
pub fn load_from_path(path: &Path, compressor: &Compressor) -> Result<ProjectState> {
    let bytes = storage::read_all(path)?;
    decode_container(&bytes, compressor)
}

/// A container flattened for embedding inside a text-only host document
/// (a session file). No binary header exists in this form, so the
/// pre-compression length travels in a sibling field; decompression
/// requires it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProjectBlob {
    /// Base64 of the zstd-compressed document.
    pub payload_b64: String,
    /// Length of the document bytes before compression.
    pub payload_len: u64,
}

/// Flattens a project into a text-safe blob.
pub fn encode_blob(state: &ProjectState, compressor: &Compressor) -> Result<ProjectBlob> {
    let doc = document::to_document(state);
    let raw = document::encode_document(&doc)?;
    let compressed = compressor.compress(&raw)?;
    Ok(ProjectBlob {
        payload_b64: compression::encode_base64(&compressed),
        payload_len: raw.len() as u64,
    })
}

/// Reconstructs a project from a text-safe blob.
pub fn decode_blob(blob: &ProjectBlob, compressor: &Compressor) -> Result<ProjectState> {
    if blob.payload_b64.is_empty() || blob.payload_len == 0 {
        return Err(PersistenceError::Format(
            "empty project payload".to_string(),
        ));
    }
    let compressed = compression::decode_base64(&blob.payload_b64)?;
    let raw = compressor.decompress_known_size(&compressed, blob.payload_len)?;
    let doc = document::decode_document(&raw)?;
    document::from_document(&doc)
}
