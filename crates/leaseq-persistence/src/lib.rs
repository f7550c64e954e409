mod checkpoint;
mod store;

pub use checkpoint::{Checkpoint, QueueRecord, CHECKPOINT_FORMAT_VERSION};
pub use store::{CheckpointStore, CheckpointStoreConfig};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Unsupported checkpoint format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(#[from] leaseq_core::QueueError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
