use thiserror::Error;

use crate::manifest::{ChunkId, FileId};

pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors surfaced by the codec, the chunk tiers and the vault.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Non-positive chunk size or otherwise unusable configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A chunk could not be written to the primary tier.
    #[error("primary write failed for chunk {chunk}: {source}")]
    PrimaryWriteFailed {
        chunk: ChunkId,
        #[source]
        source: std::io::Error,
    },

    /// Persist was asked to overwrite an existing chunk.
    #[error("chunk {0} already exists in the primary tier")]
    ChunkCollision(ChunkId),

    #[error("chunk {0} not found")]
    ChunkNotFound(ChunkId),

    /// Chunks absent from both tiers.
    #[error("irrecoverable data loss in file {file}: {} chunk(s) missing ({})", missing.len(), join_ids(missing))]
    IrrecoverableDataLoss { file: FileId, missing: Vec<ChunkId> },

    #[error("backup tier unavailable: {0}")]
    BackupUnavailable(String),

    #[error("checksum mismatch for file {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: FileId,
        expected: String,
        actual: String,
    },

    #[error("file record {0} not found")]
    RecordNotFound(FileId),

    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn join_ids(ids: &[ChunkId]) -> String {
    ids.iter().map(ChunkId::as_str).collect::<Vec<_>>().join(", ")
}
