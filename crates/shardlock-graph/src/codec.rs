//! Blob encoding of an [`EntityGraph`].
//!
//! Layout:
//!
//! ```text
//! +--------+----------------+----------------------------------+
//! | "SLG1" | crc32 (u32 LE) | zstd(bincode(EntityGraph))       |
//! +--------+----------------+----------------------------------+
//! ```
//!
//! The checksum covers the compressed payload, so a torn or bit-flipped
//! upload is rejected before decompression.

use tracing::debug;

use crate::error::{GraphError, GraphResult};
use crate::graph::EntityGraph;

const MAGIC: &[u8; 4] = b"SLG1";
const HEADER_LEN: usize = 8;
const ZSTD_LEVEL: i32 = 3;

/// An encoded graph blob plus sizes for reporting.
#[derive(Clone, Debug)]
pub struct EncodedGraph {
    pub bytes: Vec<u8>,
    /// Length of the serialized graph before compression.
    pub raw_len: usize,
}

impl EncodedGraph {
    /// Size of the blob in kilobytes.
    pub fn size_kb(&self) -> f64 {
        self.bytes.len() as f64 / 1024.0
    }

    /// Size of the uncompressed serialization in kilobytes.
    pub fn raw_size_kb(&self) -> f64 {
        self.raw_len as f64 / 1024.0
    }
}

/// Serialize, compress, and frame a graph.
pub fn encode(graph: &EntityGraph) -> GraphResult<EncodedGraph> {
    let raw = bincode::serialize(graph).map_err(|e| GraphError::Serialization(e.to_string()))?;
    let compressed = zstd::encode_all(raw.as_slice(), ZSTD_LEVEL)
        .map_err(|e| GraphError::Compression(e.to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + compressed.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&crc32fast::hash(&compressed).to_le_bytes());
    bytes.extend_from_slice(&compressed);

    debug!(raw = raw.len(), compressed = compressed.len(), "graph encoded");
    Ok(EncodedGraph {
        bytes,
        raw_len: raw.len(),
    })
}

/// Verify, decompress, and deserialize a graph blob.
pub fn decode(bytes: &[u8]) -> GraphResult<EntityGraph> {
    if bytes.len() < HEADER_LEN {
        return Err(GraphError::Truncated { len: bytes.len() });
    }
    if &bytes[..4] != MAGIC {
        return Err(GraphError::BadMagic);
    }
    let mut crc = [0u8; 4];
    crc.copy_from_slice(&bytes[4..HEADER_LEN]);
    let expected = u32::from_le_bytes(crc);

    let compressed = &bytes[HEADER_LEN..];
    let computed = crc32fast::hash(compressed);
    if computed != expected {
        return Err(GraphError::Checksum { expected, computed });
    }

    let raw = zstd::decode_all(compressed).map_err(|e| GraphError::Compression(e.to_string()))?;
    bincode::deserialize(&raw).map_err(|e| GraphError::Serialization(e.to_string()))
}
