/// Errors from item and blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An attribute exists but holds a different type than requested.
    #[error("attribute {name} has wrong type: expected {expected}")]
    AttributeType { name: String, expected: &'static str },

    /// A required attribute is missing from an item.
    #[error("item {key} is missing attribute {name}")]
    MissingAttribute { key: String, name: String },

    /// The object key cannot be mapped onto the backend (e.g. path escape).
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend failed or is unreachable.
    #[error("backend error: {0}")]
    Backend(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
