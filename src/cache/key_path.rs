//! Key Path Module
//!
//! Maps arbitrary cache keys onto safe file names. Keys are hashed with SHA-256;
//! the first two hex digits pick one of 256 shard directories so no directory
//! grows with key cardinality.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Extension of entry record files.
pub const ENTRY_EXTENSION: &str = "cache";

/// Extension of per-key lock files.
pub const LOCK_EXTENSION: &str = "lock";

/// Reserved subdirectory holding lock files, kept apart from entry shards.
pub const LOCK_DIR: &str = ".locks";

const SHARD_WIDTH: usize = 2;

/// Every on-disk location derived from one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    pub shard_dir: PathBuf,
    pub entry: PathBuf,
    pub lock: PathBuf,
}

impl KeyPath {
    pub fn new(root: &Path, key: &str) -> Self {
        let digest = hash_key(key);
        let (shard, rest) = digest.split_at(SHARD_WIDTH);

        let shard_dir = root.join(shard);
        Self {
            entry: shard_dir.join(format!("{rest}.{ENTRY_EXTENSION}")),
            lock: root
                .join(LOCK_DIR)
                .join(shard)
                .join(format!("{rest}.{LOCK_EXTENSION}")),
            shard_dir,
        }
    }
}

/// Lowercase hex SHA-256 of `key`.
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// True for directory names that can hold entries.
pub fn is_shard_name(name: &str) -> bool {
    name.len() == SHARD_WIDTH
        && name
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// True for entry record files (temporaries and locks excluded).
pub fn is_entry_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| !name.starts_with('.'))
}
