//! Storage layer error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::address::Address;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cache is full: no slot available for key {key}")]
    CacheExhausted { key: u64 },

    #[error("Data too large: record needs {required} bytes but a page holds at most {max}")]
    DataTooLarge { required: usize, max: usize },

    #[error("Database busy: no page with free space after {attempts} attempts")]
    DatabaseBusy { attempts: usize },

    #[error("Memory budget too small: {bytes} bytes is below the {min_pages} page minimum")]
    MemoryTooSmall { bytes: u64, min_pages: usize },

    #[error("Bad log file: {0}")]
    BadLogFile(String),

    #[error("Bad xid file: {0}")]
    BadXidFile(String),

    #[error("File already exists: {0:?}")]
    FileExists(PathBuf),

    #[error("File does not exist: {0:?}")]
    FileNotExists(PathBuf),

    #[error("Corrupt record at {address}: {reason}")]
    CorruptRecord { address: Address, reason: String },

    #[error("Page {page} is full: requires {required} bytes but only {available} available")]
    PageFull {
        page: u32,
        required: usize,
        available: usize,
    },

    #[error("Page not found: {0}")]
    PageNotFound(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Capacity failures clear up on their own; the caller may back off and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::CacheExhausted { .. } | StorageError::DatabaseBusy { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
