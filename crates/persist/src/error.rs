use regionstore_common::ChunkCoord;

/// Errors from region store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("chunk {coord} is not indexed")]
    NotFound { coord: ChunkCoord },
    #[error("corrupt record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: String },
    #[error("corrupt index file: length {len} is not a multiple of 16")]
    CorruptIndex { len: u64 },
    #[error("corrupt hole file: {0}")]
    CorruptHoles(String),
    #[error("record of {size} bytes exceeds the hole size limit")]
    RecordTooLarge { size: u64 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("codec error: {0}")]
    Codec(String),
}
