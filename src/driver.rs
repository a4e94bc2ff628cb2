//! Driver Contract
//!
//! The operation set every cache backend implements. Callers hold a driver
//! (usually behind an `Arc`) and never care which backend sits behind it.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::cache::CacheStats;
use crate::error::{CacheError, Result};

/// Computation handed to [`Driver::remember`].
pub type Compute<'a> = Box<dyn FnOnce() -> anyhow::Result<Value> + 'a>;

// == Driver ==
/// Key-value cache operations with TTL expiry.
///
/// TTL arguments are whole seconds: `None` applies the driver default, `Some(0)`
/// never expires and negative values are rejected with
/// [`CacheError::InvalidTtl`].
pub trait Driver: Send + Sync {
    /// Returns the live value stored under `key`.
    ///
    /// Expired entries are removed on the way out and reported as
    /// [`CacheError::KeyExpired`].
    fn load(&self, key: &str) -> Result<Value>;

    /// Like [`Driver::load`] but any miss or corruption yields `default`.
    fn safe_load(&self, key: &str, default: Value) -> Value {
        self.load(key).unwrap_or(default)
    }

    /// Loads every key that resolves; the rest are left out.
    fn load_many(&self, keys: &[&str]) -> HashMap<String, Value> {
        keys.iter()
            .filter_map(|key| self.load(key).ok().map(|value| (key.to_string(), value)))
            .collect()
    }

    /// Returns the live value, or computes and stores it exactly once across
    /// concurrent callers for `key`.
    fn remember(&self, key: &str, ttl: Option<i64>, compute: Compute<'_>) -> Result<Value>;

    /// True iff a live, valid entry is stored under `key`.
    fn exists(&self, key: &str) -> bool {
        self.load(key).is_ok()
    }

    /// Stores `value`, replacing any previous entry.
    fn save(&self, key: &str, value: Value, ttl: Option<i64>) -> Result<bool>;

    /// Stores each pair independently and returns how many were stored.
    fn save_many(&self, values: Vec<(String, Value)>, ttl: Option<i64>) -> usize {
        values
            .into_iter()
            .filter(|(key, value)| match self.save(key, value.clone(), ttl) {
                Ok(stored) => stored,
                Err(err) => {
                    warn!(key = key.as_str(), error = %err, "batch save skipped key");
                    false
                }
            })
            .count()
    }

    /// Adds `step` to the integer under `key`, starting from 0 if absent.
    fn increment(&self, key: &str, step: i64) -> Result<i64>;

    /// Subtracts `step` from the integer under `key`, starting from 0 if absent.
    fn decrement(&self, key: &str, step: i64) -> Result<i64> {
        let step = step
            .checked_neg()
            .ok_or_else(|| CacheError::CounterOverflow(key.to_string()))?;
        self.increment(key, step)
    }

    /// Removes `key`. Removing an absent key succeeds.
    fn delete(&self, key: &str) -> Result<()>;

    /// Removes each key and returns how many were actually present.
    fn delete_many(&self, keys: &[&str]) -> usize;

    /// Removes every entry.
    fn clear(&self) -> Result<()>;

    /// Removes expired entries and returns how many were removed.
    fn clean(&self) -> Result<usize>;

    /// Entries physically stored, expired-but-unswept ones included.
    fn count(&self) -> Result<usize>;

    fn set_default_ttl(&self, ttl: Option<i64>) -> Result<()>;

    fn default_ttl(&self) -> Option<i64>;

    fn stats(&self) -> CacheStats;
}

// == Typed Access ==
/// Serde-typed helpers available on every driver.
pub trait DriverExt: Driver {
    /// Loads `key` and deserializes it into `T`.
    fn load_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.load(key)?;
        serde_json::from_value(value).map_err(|err| CacheError::InvalidDataStructure {
            key: key.to_string(),
            reason: err.to_string(),
        })
    }

    /// Serializes `value` and stores it under `key`.
    fn save_as<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<i64>) -> Result<bool> {
        let value = serde_json::to_value(value)?;
        self.save(key, value, ttl)
    }

    /// Typed [`Driver::remember`].
    fn remember_with<T, F>(&self, key: &str, ttl: Option<i64>, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> anyhow::Result<T>,
    {
        let value = self.remember(
            key,
            ttl,
            Box::new(move || -> anyhow::Result<Value> { Ok(serde_json::to_value(compute()?)?) }),
        )?;
        serde_json::from_value(value).map_err(|err| CacheError::InvalidDataStructure {
            key: key.to_string(),
            reason: err.to_string(),
        })
    }
}

impl<D: Driver + ?Sized> DriverExt for D {}
