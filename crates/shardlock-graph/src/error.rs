//! Error types for graph encoding.

/// Errors that can occur while encoding or decoding a graph blob.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The blob does not start with the graph magic bytes.
    #[error("not a graph blob: bad magic")]
    BadMagic,

    /// The blob is shorter than its header.
    #[error("graph blob truncated: {len} bytes")]
    Truncated { len: usize },

    /// The compressed payload does not match its checksum.
    #[error("graph blob checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    Checksum { expected: u32, computed: u32 },

    /// Compression or decompression failure.
    #[error("compression error: {0}")]
    Compression(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias for graph results.
pub type GraphResult<T> = Result<T, GraphError>;
