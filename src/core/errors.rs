//! Error types for kvbench
//!
//! `StorageError` is what an engine adapter reports. `BenchError` is what the
//! harness reports; its `Open` and `Write` variants are fatal for a run.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a storage engine adapter
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Engine is closed")]
    Closed,
}

/// Errors raised by the benchmark harness
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("open error: {}: {}", path.display(), source)]
    Open {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    #[error("put error: key {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("requested {requested} bytes from a {capacity}-byte generator buffer")]
    ValueTooLarge { requested: usize, capacity: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for engine operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, BenchError>;
