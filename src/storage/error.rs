//! Storage layer error types.

use crate::storage::page::PageId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Out of range access: {len} bytes at offset {offset} exceeds limit {limit}")]
    OutOfRange { offset: usize, len: usize, limit: usize },

    #[error("Requested key not found in table")]
    KeyNotFound,

    #[error("Backend unavailable: {path:?}: {reason}")]
    BackendUnavailable { path: PathBuf, reason: String },

    #[error("Buffer pool exhausted: all {capacity} frames are pinned")]
    PoolExhausted { capacity: usize },

    #[error("Page {page_id} with {page_size}-byte pages lies past the addressable range")]
    PageOutOfRange { page_id: u64, page_size: usize },

    #[error("Page {0} is mutably borrowed through a lease")]
    PageInUse(PageId),

    #[error("The all-zero key/value pair is reserved for empty slots")]
    ReservedEntry,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Corrupted table: {0}")]
    Corrupted(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// True for the routine lookup miss, as opposed to a real failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::KeyNotFound)
    }
}
