use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Every attempt found the lock held (or the store unreachable).
    #[error("lock {lock} not acquired after {attempts} attempts")]
    LockNotAcquired {
        lock: String,
        attempts: u32,
        /// The last store error seen while trying, if any attempt failed on one.
        last_error: Option<String>,
    },

    #[error("persist cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error("graph pointer references missing blob {blob_key}")]
    MissingBlob { blob_key: String },

    #[error("corrupt graph pointer {key}: {reason}")]
    CorruptPointer { key: String, reason: String },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] shardlock_store::StoreError),

    #[error("mutex error: {0}")]
    Mutex(#[from] shardlock_mutex::MutexError),

    #[error("graph error: {0}")]
    Graph(#[from] shardlock_graph::GraphError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
