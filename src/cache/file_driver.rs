//! File Driver Module
//!
//! Directory-backed cache: one record file per key under sharded
//! subdirectories. Writes go to a temporary file that is renamed over the target,
//! so readers see either the old or the new record and never a torn one. Every
//! mutation of a key happens under that key's advisory file lock, which also
//! makes `remember` single-flight across processes sharing the directory.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::codec::{decode_header, decode_record, encode_record};
use crate::cache::entry::{apply_step, as_counter, resolve_ttl, validate_ttl};
use crate::cache::file_lock::FileLock;
use crate::cache::key_path::{is_entry_file, is_shard_name, KeyPath};
use crate::cache::{CacheEntry, CacheStats, SingleFlight, StatsCounters};
use crate::clock::{system_clock, SharedClock};
use crate::config::CacheConfig;
use crate::driver::{Compute, Driver};
use crate::error::{CacheError, Result};

// == File Driver ==
/// Persistent cache implementing [`Driver`] on top of a directory.
///
/// # Limits
/// - Lock files under `.locks/` are never removed, by `delete` or `clear`. A
///   waiter may hold an open descriptor on one, and unlinking it would let a
///   second holder lock a fresh inode. The lock tree grows with the number of
///   distinct keys ever written.
/// - `clear` removes shard directories without taking per-key locks. A `save`
///   racing with it can fail with [`CacheError::FileWrite`] or survive the
///   clear; retry after `clear` returns.
#[derive(Debug)]
pub struct FileDriver {
    directory: RwLock<PathBuf>,
    default_ttl: RwLock<Option<i64>>,
    flights: SingleFlight,
    stats: StatsCounters,
    clock: SharedClock,
}

impl FileDriver {
    // == Constructor ==
    /// Opens (creating if needed) a cache rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        Self::with_clock(directory, system_clock())
    }

    /// Opens a cache reading time from `clock`.
    pub fn with_clock(directory: impl Into<PathBuf>, clock: SharedClock) -> Result<Self> {
        let driver = Self {
            directory: RwLock::new(PathBuf::new()),
            default_ttl: RwLock::new(None),
            flights: SingleFlight::new(),
            stats: StatsCounters::new(),
            clock,
        };
        driver.set_directory(directory)?;
        Ok(driver)
    }

    /// Opens the cache at `config.directory` with the configured default TTL.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let driver = Self::new(&config.directory)?;
        driver.set_default_ttl(config.default_ttl)?;
        Ok(driver)
    }

    // == Directory ==
    /// Points the driver at `directory`, creating it and any missing parents.
    pub fn set_directory(&self, directory: impl Into<PathBuf>) -> Result<()> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|source| CacheError::DirectoryCreate {
            path: directory.clone(),
            source,
        })?;
        debug!(directory = %directory.display(), "cache directory ready");
        *self.directory.write() = directory;
        Ok(())
    }

    pub fn directory(&self) -> PathBuf {
        self.directory.read().clone()
    }

    /// Bytes occupied on disk by entry files, record framing included.
    pub fn disk_usage(&self) -> Result<u64> {
        let mut total = 0;
        for path in self.entry_files()? {
            match fs::metadata(&path) {
                Ok(meta) => total += meta.len(),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(CacheError::FileRead { path, source }),
            }
        }
        Ok(total)
    }

    fn paths(&self, key: &str) -> KeyPath {
        KeyPath::new(&self.directory.read(), key)
    }

    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    // == Record I/O ==
    /// Reads and validates the record for `key` without checking expiry.
    fn read_entry(&self, key: &str, paths: &KeyPath) -> Result<CacheEntry> {
        let bytes = read_file(&paths.entry)?
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))?;
        decode_record(key, &bytes)
    }

    /// Reads the record for `key`, treating an expired one as absent.
    fn read_live(&self, key: &str, paths: &KeyPath, now: u64) -> Result<Option<CacheEntry>> {
        match self.read_entry(key, paths) {
            Ok(entry) if entry.is_expired(now) => Ok(None),
            Ok(entry) => Ok(Some(entry)),
            Err(CacheError::KeyNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Writes `entry` via temp file + rename. Caller holds the key lock.
    fn write_entry(&self, paths: &KeyPath, entry: &CacheEntry) -> Result<()> {
        let record = encode_record(entry)?;

        fs::create_dir_all(&paths.shard_dir).map_err(|source| CacheError::DirectoryCreate {
            path: paths.shard_dir.clone(),
            source,
        })?;

        let write_err = |source: io::Error| CacheError::FileWrite {
            path: paths.entry.clone(),
            source,
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp")
            .tempfile_in(&paths.shard_dir)
            .map_err(write_err)?;
        tmp.write_all(&record).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&paths.entry)
            .map_err(|err| write_err(err.error))?;

        debug!(key = entry.key.as_str(), bytes = record.len(), "wrote cache record");
        Ok(())
    }

    /// Drops the record for `key` if it is still expired at `now`.
    fn expire(&self, key: &str, paths: &KeyPath, now: u64) -> Result<bool> {
        let _lock = FileLock::acquire(&paths.lock)?;
        let still_expired = match self.read_entry(key, paths) {
            Ok(entry) => entry.is_expired(now),
            Err(_) => false,
        };
        if still_expired {
            remove_file(&paths.entry)?;
            self.stats.record_expirations(1);
            debug!(key, "dropped expired record on read");
        }
        Ok(still_expired)
    }

    fn delete_locked(&self, key: &str) -> Result<bool> {
        let paths = self.paths(key);
        let _lock = FileLock::acquire(&paths.lock)?;
        remove_file(&paths.entry)
    }

    /// Every entry file currently under the root.
    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let root = self.directory();
        let mut files = Vec::new();
        for shard in shard_dirs(&root)? {
            let listing = match fs::read_dir(&shard) {
                Ok(listing) => listing,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => return Err(CacheError::FileRead { path: shard, source }),
            };
            files.extend(
                listing
                    .filter_map(|item| item.ok().map(|item| item.path()))
                    .filter(|path| is_entry_file(path)),
            );
        }
        Ok(files)
    }

    /// Removes the record at `path` if it is expired, re-checking under the lock.
    fn sweep_file(&self, root: &Path, path: &Path, now: u64) -> Result<bool> {
        let label = path.display().to_string();
        let header = match read_file(path)? {
            Some(bytes) => decode_header(&label, &bytes)?,
            None => return Ok(false),
        };
        if !header.is_expired(now) {
            return Ok(false);
        }

        let paths = KeyPath::new(root, &header.key);
        if paths.entry != path {
            return Err(CacheError::DataCorrupted {
                key: header.key,
                reason: format!("record stored at foreign path {label}"),
            });
        }
        self.expire(&header.key, &paths, now)
    }
}

impl Driver for FileDriver {
    fn load(&self, key: &str) -> Result<Value> {
        let paths = self.paths(key);
        let now = self.now();

        let entry = match self.read_entry(key, &paths) {
            Ok(entry) => entry,
            Err(err) => {
                self.stats.record_miss();
                return Err(err);
            }
        };

        if entry.is_expired(now) {
            self.stats.record_miss();
            self.expire(key, &paths, now)?;
            return Err(CacheError::KeyExpired(key.to_string()));
        }

        self.stats.record_hit();
        Ok(entry.value)
    }

    fn remember(&self, key: &str, ttl: Option<i64>, compute: Compute<'_>) -> Result<Value> {
        validate_ttl(ttl)?;
        self.flights.run(
            key,
            || match self.load(key) {
                Ok(value) => Ok(Some(value)),
                Err(CacheError::KeyNotFound(_) | CacheError::KeyExpired(_)) => Ok(None),
                Err(err) => Err(err),
            },
            || {
                let paths = self.paths(key);
                let _lock = FileLock::acquire(&paths.lock)?;

                // Another process may have filled the key while we waited.
                if let Some(entry) = self.read_live(key, &paths, self.now())? {
                    return Ok(entry.value);
                }

                let value = compute().map_err(CacheError::Compute)?;
                let ttl_seconds = resolve_ttl(ttl, self.default_ttl())?;
                let entry = CacheEntry::new(key.to_string(), value, self.now(), ttl_seconds)?;
                self.write_entry(&paths, &entry)?;
                Ok(entry.value)
            },
        )
    }

    fn save(&self, key: &str, value: Value, ttl: Option<i64>) -> Result<bool> {
        let ttl_seconds = resolve_ttl(ttl, self.default_ttl())?;
        let entry = CacheEntry::new(key.to_string(), value, self.now(), ttl_seconds)?;

        let paths = self.paths(key);
        let _lock = FileLock::acquire(&paths.lock)?;
        self.write_entry(&paths, &entry)?;
        Ok(true)
    }

    fn increment(&self, key: &str, step: i64) -> Result<i64> {
        let paths = self.paths(key);
        let _lock = FileLock::acquire(&paths.lock)?;
        let now = self.now();

        let (entry, next) = match self.read_live(key, &paths, now)? {
            Some(mut entry) => {
                let current = as_counter(&entry.value)
                    .ok_or_else(|| CacheError::NonNumericValue(key.to_string()))?;
                let next = apply_step(key, current, step)?;
                entry.replace_value(Value::from(next))?;
                (entry, next)
            }
            None => {
                let next = apply_step(key, 0, step)?;
                let ttl_seconds = resolve_ttl(None, self.default_ttl())?;
                let entry = CacheEntry::new(key.to_string(), Value::from(next), now, ttl_seconds)?;
                (entry, next)
            }
        };

        self.write_entry(&paths, &entry)?;
        Ok(next)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.delete_locked(key).map(|_| ())
    }

    fn delete_many(&self, keys: &[&str]) -> usize {
        keys.iter()
            .filter(|key| match self.delete_locked(key) {
                Ok(removed) => removed,
                Err(err) => {
                    warn!(key = **key, error = %err, "batch delete skipped key");
                    false
                }
            })
            .count()
    }

    fn clear(&self) -> Result<()> {
        let root = self.directory();
        for shard in shard_dirs(&root)? {
            match fs::remove_dir_all(&shard) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(CacheError::DirectoryDelete {
                        path: shard,
                        source,
                    })
                }
            }
        }
        info!(directory = %root.display(), "cache cleared");
        Ok(())
    }

    // == Cleanup Expired ==
    fn clean(&self) -> Result<usize> {
        let root = self.directory();
        let now = self.now();
        let mut removed = 0;

        for path in self.entry_files()? {
            match self.sweep_file(&root, &path, now) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) if err.is_miss() => {
                    warn!(path = %path.display(), error = %err, "sweep skipped unreadable record");
                }
                Err(err) => return Err(err),
            }
        }

        if removed > 0 {
            info!(removed, "swept expired records");
        }
        Ok(removed)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.entry_files()?.len())
    }

    fn set_default_ttl(&self, ttl: Option<i64>) -> Result<()> {
        validate_ttl(ttl)?;
        *self.default_ttl.write() = ttl;
        Ok(())
    }

    fn default_ttl(&self) -> Option<i64> {
        *self.default_ttl.read()
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.count().unwrap_or_default())
    }
}

// == Filesystem Helpers ==
/// Reads `path`, mapping "not found" to `None`.
fn read_file(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CacheError::FileRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Removes `path`, returning whether it existed.
fn remove_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(CacheError::FileDelete {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Shard directories under `root`; a missing root has none.
fn shard_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let listing = match fs::read_dir(root) {
        Ok(listing) => listing,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(CacheError::FileRead {
                path: root.to_path_buf(),
                source,
            })
        }
    };

    Ok(listing
        .filter_map(|item| item.ok())
        .filter(|item| item.file_type().is_ok_and(|kind| kind.is_dir()))
        .filter(|item| item.file_name().to_str().is_some_and(is_shard_name))
        .map(|item| item.path())
        .collect())
}
