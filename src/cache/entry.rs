//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support, plus the
//! TTL resolution rules every driver shares.

use serde_json::Value;

use crate::error::{CacheError, Result};

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Caller-chosen key
    pub key: String,
    /// The stored value
    pub value: Value,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
    /// Length of the encoded value payload
    pub size_bytes: usize,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry stamped at `now`.
    ///
    /// # Arguments
    /// * `key` - The entry key
    /// * `value` - The value to store
    /// * `now` - Current time in Unix milliseconds
    /// * `ttl_seconds` - Resolved TTL, None = never expires
    pub fn new(key: String, value: Value, now: u64, ttl_seconds: Option<u64>) -> Result<Self> {
        let size_bytes = super::codec::encoded_len(&key, &value)?;
        Ok(Self {
            key,
            value,
            created_at: now,
            expires_at: expires_at(now, ttl_seconds),
            size_bytes,
        })
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// An entry is expired once the current time reaches its expiration time, so
    /// a TTL of one second is already gone exactly one second later.
    pub fn is_expired(&self, now: u64) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    /// Remaining TTL in milliseconds, or None if the entry never expires.
    pub fn ttl_remaining_ms(&self, now: u64) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_sub(now))
    }

    /// Replaces the value in place, keeping both timestamps.
    pub fn replace_value(&mut self, value: Value) -> Result<()> {
        self.size_bytes = super::codec::encoded_len(&self.key, &value)?;
        self.value = value;
        Ok(())
    }
}

// == TTL Rules ==
/// Rejects negative TTLs.
pub fn validate_ttl(ttl: Option<i64>) -> Result<()> {
    match ttl {
        Some(secs) if secs < 0 => Err(CacheError::InvalidTtl(secs)),
        _ => Ok(()),
    }
}

/// Resolves a per-call TTL against the driver default.
///
/// `None` falls back to `default_ttl`; `0` (explicit or default) means the entry
/// never expires and resolves to `None`.
pub fn resolve_ttl(ttl: Option<i64>, default_ttl: Option<i64>) -> Result<Option<u64>> {
    validate_ttl(ttl)?;
    match ttl.or(default_ttl) {
        Some(secs) if secs < 0 => Err(CacheError::InvalidTtl(secs)),
        Some(0) | None => Ok(None),
        Some(secs) => Ok(Some(secs as u64)),
    }
}

/// Expiration timestamp for an entry written at `now`.
pub fn expires_at(now: u64, ttl_seconds: Option<u64>) -> Option<u64> {
    ttl_seconds.map(|ttl| now.saturating_add(ttl.saturating_mul(1000)))
}

// == Counters ==
/// Reads a stored value as a counter.
///
/// Integers and strings holding an integer qualify; floats, booleans and
/// containers do not.
pub fn as_counter(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Applies `step` to the counter stored under `key`.
pub fn apply_step(key: &str, current: i64, step: i64) -> Result<i64> {
    current
        .checked_add(step)
        .ok_or_else(|| CacheError::CounterOverflow(key.to_string()))
}
