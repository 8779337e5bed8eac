use std::path::PathBuf;

use thiserror::Error;

/// Boxed error from a storage backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("failed to encode block")]
    Encoding(#[source] bincode::Error),

    #[error("corrupt or foreign block data")]
    Decoding(#[source] bincode::Error),

    #[error("failed to open chain storage at {}", path.display())]
    StorageOpen {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("failed to write to chain storage")]
    StorageWrite(#[source] BoxError),

    /// The block is committed and is the new tip, but it may not be durable.
    #[error("block {hash} was committed but flushing chain storage failed")]
    StorageFlush {
        hash: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to read chain storage")]
    StorageRead(#[source] BoxError),

    #[error("block {0} is referenced but not stored")]
    MissingBlock(String),

    #[error("nonce space exhausted without meeting a target of {target_bits} bits")]
    MiningExhausted { target_bits: u32 },

    #[error("mining cancelled")]
    MiningCancelled,

    #[error("target bits must be between 1 and 255, got {0}")]
    InvalidTargetBits(u32),

    #[error("block {0} failed proof-of-work validation")]
    InvalidBlock(String),
}

pub type Result<T, E = ChainError> = std::result::Result<T, E>;
