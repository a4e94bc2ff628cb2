//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type shared by every driver.
#[derive(Error, Debug)]
pub enum CacheError {
    // -- absence / validity --
    /// Key is not stored
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Key is stored but its TTL has elapsed
    #[error("Key expired: {0}")]
    KeyExpired(String),

    // -- corruption --
    /// Stored record failed checksum, length or key verification
    #[error("Data corrupted for key {key}: {reason}")]
    DataCorrupted { key: String, reason: String },

    /// Stored record could not be parsed into the expected shape
    #[error("Invalid data structure for key {key}: {reason}")]
    InvalidDataStructure { key: String, reason: String },

    /// Stored record lacks a required field
    #[error("Missing required field `{field}` in record for key {key}")]
    MissingRequiredKey { key: String, field: &'static str },

    // -- configuration misuse --
    #[error("Invalid TTL: {0} (must be >= 0)")]
    InvalidTtl(i64),

    #[error("Invalid max items: {0} (must be >= 0)")]
    InvalidMaxItems(i64),

    #[error("Invalid memory limit: {0} (must be >= 0)")]
    InvalidMemoryLimit(i64),

    // -- resource pressure --
    /// Entry cannot fit under the configured byte limit
    #[error("Memory limit exceeded: entry of {size} bytes does not fit in limit of {limit} bytes")]
    MemoryLimitExceeded { size: usize, limit: usize },

    /// Entry cannot fit under the configured item limit
    #[error("Items limit exceeded: limit is {limit}")]
    ItemsLimitExceeded { limit: usize },

    // -- i/o --
    #[error("Failed to write {path}: {source}")]
    FileWrite { path: PathBuf, source: io::Error },

    #[error("Failed to read {path}: {source}")]
    FileRead { path: PathBuf, source: io::Error },

    #[error("Failed to delete {path}: {source}")]
    FileDelete { path: PathBuf, source: io::Error },

    #[error("Failed to lock {path}: {source}")]
    FileLock { path: PathBuf, source: io::Error },

    #[error("Failed to create directory {path}: {source}")]
    DirectoryCreate { path: PathBuf, source: io::Error },

    #[error("Failed to delete directory {path}: {source}")]
    DirectoryDelete { path: PathBuf, source: io::Error },

    // -- type mismatch --
    /// Counter operation on a value that is not an integer
    #[error("Value stored at {0} is not an integer")]
    NonNumericValue(String),

    /// Counter operation would overflow a 64-bit integer
    #[error("Counter overflow at {0}")]
    CounterOverflow(String),

    /// A `remember` computation failed; nothing was stored
    #[error("Compute failed: {0}")]
    Compute(#[source] anyhow::Error),

    /// A typed value could not be converted to a cache value
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// True for the errors a lenient read path (`safe_load`, `exists`) swallows.
    pub fn is_miss(&self) -> bool {
        matches!(
            self,
            CacheError::KeyNotFound(_)
                | CacheError::KeyExpired(_)
                | CacheError::DataCorrupted { .. }
                | CacheError::InvalidDataStructure { .. }
                | CacheError::MissingRequiredKey { .. }
        )
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
