//! Memory Driver Module
//!
//! Bounded in-process cache combining a HashMap with LRU tracking, TTL expiry and
//! item/byte limits. One mutex covers the table, the recency order and the
//! running totals for the whole of each call.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::cache::entry::{apply_step, as_counter, resolve_ttl, validate_ttl};
use crate::cache::{CacheEntry, CacheStats, LruTracker, SingleFlight, StatsCounters};
use crate::clock::{system_clock, SharedClock};
use crate::config::CacheConfig;
use crate::driver::{Compute, Driver};
use crate::error::{CacheError, Result};

// == Table ==
/// State guarded by the driver mutex.
#[derive(Debug, Default)]
struct Table {
    entries: HashMap<String, CacheEntry>,
    lru: LruTracker,
    /// Sum of `size_bytes` over `entries`
    memory_usage: usize,
    default_ttl: Option<i64>,
    max_items: Option<usize>,
    memory_limit: Option<usize>,
}

impl Table {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(key);
        self.memory_usage -= entry.size_bytes;
        Some(entry)
    }

    /// Returns the live entry for `key`, dropping it if expired.
    fn live(&mut self, key: &str, now: u64, stats: &StatsCounters) -> Result<&mut CacheEntry> {
        let expired = match self.entries.get(key) {
            None => return Err(CacheError::KeyNotFound(key.to_string())),
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            self.remove(key);
            stats.record_expirations(1);
            debug!(key, "dropped expired entry on read");
            return Err(CacheError::KeyExpired(key.to_string()));
        }

        self.lru.touch(key);
        self.entries
            .get_mut(key)
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))
    }

    fn load(&mut self, key: &str, now: u64, stats: &StatsCounters) -> Result<Value> {
        match self.live(key, now, stats) {
            Ok(entry) => {
                stats.record_hit();
                Ok(entry.value.clone())
            }
            Err(err) => {
                stats.record_miss();
                Err(err)
            }
        }
    }

    // == Admission ==
    /// Inserts `entry`, evicting least recently used entries until it fits.
    fn admit(&mut self, entry: CacheEntry, stats: &StatsCounters) -> Result<()> {
        if let Some(limit) = self.memory_limit {
            if entry.size_bytes > limit {
                return Err(CacheError::MemoryLimitExceeded {
                    size: entry.size_bytes,
                    limit,
                });
            }
        }

        let key = entry.key.clone();
        let replaced = self.entries.get(&key).map(|old| old.size_bytes);
        // Occupancy once the old version of this key is gone.
        let mut items = self.entries.len() - usize::from(replaced.is_some());
        let mut bytes = self.memory_usage - replaced.unwrap_or(0);

        loop {
            let over_items = self.max_items.is_some_and(|max| items + 1 > max);
            let over_bytes = self
                .memory_limit
                .is_some_and(|limit| bytes + entry.size_bytes > limit);
            if !over_items && !over_bytes {
                break;
            }

            match self.lru.evict_oldest_except(&key) {
                Some(victim) => {
                    if let Some(evicted) = self.entries.remove(&victim) {
                        self.memory_usage -= evicted.size_bytes;
                        items -= 1;
                        bytes -= evicted.size_bytes;
                        stats.record_eviction();
                        debug!(key = victim.as_str(), "evicted least recently used entry");
                    }
                }
                None if over_items => {
                    return Err(CacheError::ItemsLimitExceeded {
                        limit: self.max_items.unwrap_or_default(),
                    });
                }
                None => {
                    return Err(CacheError::MemoryLimitExceeded {
                        size: entry.size_bytes,
                        limit: self.memory_limit.unwrap_or_default(),
                    });
                }
            }
        }

        self.remove(&key);
        self.memory_usage += entry.size_bytes;
        self.entries.insert(key.clone(), entry);
        self.lru.touch(&key);
        Ok(())
    }

    fn save(&mut self, key: &str, value: Value, ttl: Option<i64>, now: u64, stats: &StatsCounters) -> Result<bool> {
        let ttl_seconds = resolve_ttl(ttl, self.default_ttl)?;
        let entry = CacheEntry::new(key.to_string(), value, now, ttl_seconds)?;
        self.admit(entry, stats)?;
        Ok(true)
    }
}

// == Memory Driver ==
/// In-process LRU cache implementing [`Driver`].
#[derive(Debug)]
pub struct MemoryDriver {
    table: Mutex<Table>,
    flights: SingleFlight,
    stats: StatsCounters,
    clock: SharedClock,
}

impl MemoryDriver {
    // == Constructor ==
    /// Creates an unbounded driver with no default TTL.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Creates a driver reading time from `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            flights: SingleFlight::new(),
            stats: StatsCounters::new(),
            clock,
        }
    }

    /// Creates a driver with the limits and default TTL from `config`.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let driver = Self::new();
        driver.set_default_ttl(config.default_ttl)?;
        driver.set_max_items(config.max_items)?;
        driver.set_memory_limit(config.memory_limit)?;
        Ok(driver)
    }

    // == Limits ==
    /// Caps the number of stored entries; `None` removes the cap.
    pub fn set_max_items(&self, max_items: Option<i64>) -> Result<()> {
        let max_items = match max_items {
            Some(max) if max < 0 => return Err(CacheError::InvalidMaxItems(max)),
            other => other.map(|max| max as usize),
        };
        self.table.lock().max_items = max_items;
        Ok(())
    }

    pub fn max_items(&self) -> Option<usize> {
        self.table.lock().max_items
    }

    /// Caps the total encoded size of stored values; `None` removes the cap.
    pub fn set_memory_limit(&self, memory_limit: Option<i64>) -> Result<()> {
        let memory_limit = match memory_limit {
            Some(limit) if limit < 0 => return Err(CacheError::InvalidMemoryLimit(limit)),
            other => other.map(|limit| limit as usize),
        };
        self.table.lock().memory_limit = memory_limit;
        Ok(())
    }

    pub fn memory_limit(&self) -> Option<usize> {
        self.table.lock().memory_limit
    }

    /// Total encoded bytes currently stored, unswept expired entries included.
    pub fn memory_usage(&self) -> usize {
        self.table.lock().memory_usage
    }

    fn now(&self) -> u64 {
        self.clock.now_ms()
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for MemoryDriver {
    fn load(&self, key: &str) -> Result<Value> {
        self.table.lock().load(key, self.now(), &self.stats)
    }

    fn load_many(&self, keys: &[&str]) -> HashMap<String, Value> {
        let now = self.now();
        let mut table = self.table.lock();
        keys.iter()
            .filter_map(|key| {
                table
                    .load(key, now, &self.stats)
                    .ok()
                    .map(|value| (key.to_string(), value))
            })
            .collect()
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
                let value = compute().map_err(CacheError::Compute)?;
                self.save(key, value.clone(), ttl)?;
                Ok(value)
            },
        )
    }

    fn exists(&self, key: &str) -> bool {
        self.table.lock().live(key, self.now(), &self.stats).is_ok()
    }

    fn save(&self, key: &str, value: Value, ttl: Option<i64>) -> Result<bool> {
        self.table.lock().save(key, value, ttl, self.now(), &self.stats)
    }

    fn save_many(&self, values: Vec<(String, Value)>, ttl: Option<i64>) -> usize {
        let now = self.now();
        let mut table = self.table.lock();
        values
            .into_iter()
            .filter(|(key, value)| {
                matches!(table.save(key, value.clone(), ttl, now, &self.stats), Ok(true))
            })
            .count()
    }

    fn increment(&self, key: &str, step: i64) -> Result<i64> {
        let now = self.now();
        let mut table = self.table.lock();

        match table.live(key, now, &self.stats) {
            Ok(entry) => {
                let current = as_counter(&entry.value)
                    .ok_or_else(|| CacheError::NonNumericValue(key.to_string()))?;
                let next = apply_step(key, current, step)?;
                // Timestamps carry over; a longer encoding goes through admission.
                let mut updated = entry.clone();
                updated.replace_value(Value::from(next))?;
                table.admit(updated, &self.stats)?;
                Ok(next)
            }
            Err(CacheError::KeyNotFound(_) | CacheError::KeyExpired(_)) => {
                let next = apply_step(key, 0, step)?;
                table.save(key, Value::from(next), None, now, &self.stats)?;
                Ok(next)
            }
            Err(err) => Err(err),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.table.lock().remove(key);
        Ok(())
    }

    fn delete_many(&self, keys: &[&str]) -> usize {
        let mut table = self.table.lock();
        keys.iter().filter(|key| table.remove(key).is_some()).count()
    }

    fn clear(&self) -> Result<()> {
        let mut table = self.table.lock();
        table.entries.clear();
        table.lru.clear();
        table.memory_usage = 0;
        Ok(())
    }

    // == Cleanup Expired ==
    fn clean(&self) -> Result<usize> {
        let now = self.now();
        let mut table = self.table.lock();

        let expired: Vec<String> = table
            .entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key.clone())
            .collect();
        for key in &expired {
            table.remove(key);
        }

        self.stats.record_expirations(expired.len());
        Ok(expired.len())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.table.lock().entries.len())
    }

    fn set_default_ttl(&self, ttl: Option<i64>) -> Result<()> {
        validate_ttl(ttl)?;
        self.table.lock().default_ttl = ttl;
        Ok(())
    }

    fn default_ttl(&self) -> Option<i64> {
        self.table.lock().default_ttl
    }

    fn stats(&self) -> CacheStats {
        let total = self.table.lock().entries.len();
        self.stats.snapshot(total)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn driver() -> (MemoryDriver, ManualClock) {
        let clock = ManualClock::default();
        (MemoryDriver::with_clock(clock.shared()), clock)
    }

    #[test]
    fn test_save_and_load() {
        let (driver, _) = driver();

        assert!(driver.save("key1", json!({"a": [1, 2]}), None).unwrap());
        assert_eq!(driver.load("key1").unwrap(), json!({"a": [1, 2]}));
        assert_eq!(driver.count().unwrap(), 1);
    }

    #[test]
    fn test_load_nonexistent() {
        let (driver, _) = driver();
        assert!(matches!(driver.load("nope"), Err(CacheError::KeyNotFound(_))));
    }

    #[test]
    fn test_overwrite_updates_memory_usage() {
        let (driver, _) = driver();

        driver.save("k", json!("abc"), None).unwrap();
        assert_eq!(driver.memory_usage(), 5);

        driver.save("k", json!("abcdef"), None).unwrap();
        assert_eq!(driver.memory_usage(), 8);
        assert_eq!(driver.count().unwrap(), 1);
    }

    #[test]
    fn test_expired_entry_is_dropped_on_load() {
        let (driver, clock) = driver();

        driver.save("k", json!(1), Some(1)).unwrap();
        clock.advance_secs(2);

        assert_eq!(driver.count().unwrap(), 1);
        assert!(matches!(driver.load("k"), Err(CacheError::KeyExpired(_))));
        assert_eq!(driver.count().unwrap(), 0);
        assert_eq!(driver.memory_usage(), 0);
    }

    #[test]
    fn test_default_ttl_applies_to_later_writes_only() {
        let (driver, clock) = driver();

        driver.save("before", json!(1), None).unwrap();
        driver.set_default_ttl(Some(10)).unwrap();
        driver.save("after", json!(2), None).unwrap();

        clock.advance_secs(11);
        assert!(driver.exists("before"));
        assert!(!driver.exists("after"));
    }

    #[test]
    fn test_negative_limits_rejected() {
        let (driver, _) = driver();

        assert!(matches!(driver.set_max_items(Some(-1)), Err(CacheError::InvalidMaxItems(-1))));
        assert!(matches!(
            driver.set_memory_limit(Some(-5)),
            Err(CacheError::InvalidMemoryLimit(-5))
        ));
        assert!(matches!(driver.set_default_ttl(Some(-2)), Err(CacheError::InvalidTtl(-2))));
        assert!(matches!(driver.save("k", json!(1), Some(-1)), Err(CacheError::InvalidTtl(-1))));
    }

    #[test]
    fn test_lru_eviction_by_item_count() {
        let (driver, _) = driver();
        driver.set_max_items(Some(2)).unwrap();

        driver.save("a", json!(1), None).unwrap();
        driver.save("b", json!(2), None).unwrap();
        driver.load("a").unwrap();
        driver.save("c", json!(3), None).unwrap();

        assert!(driver.exists("a"));
        assert!(!driver.exists("b"));
        assert!(driver.exists("c"));
        assert_eq!(driver.stats().evictions, 1);
    }

    #[test]
    fn test_eviction_by_memory_limit() {
        let (driver, _) = driver();
        driver.set_memory_limit(Some(10)).unwrap();

        driver.save("a", json!("xxx"), None).unwrap(); // 5 bytes
        driver.save("b", json!("yyy"), None).unwrap(); // 5 bytes
        driver.save("c", json!("zz"), None).unwrap(); // 4 bytes, evicts a

        assert!(!driver.exists("a"));
        assert!(driver.exists("b"));
        assert!(driver.exists("c"));
        assert_eq!(driver.memory_usage(), 9);
    }

    #[test]
    fn test_zero_max_items_rejects() {
        let (driver, _) = driver();
        driver.set_max_items(Some(0)).unwrap();

        assert!(matches!(
            driver.save("a", json!(1), None),
            Err(CacheError::ItemsLimitExceeded { limit: 0 })
        ));
        assert_eq!(driver.count().unwrap(), 0);
    }

    #[test]
    fn test_oversized_entry_rejected_without_eviction() {
        let (driver, _) = driver();
        driver.set_memory_limit(Some(100)).unwrap();
        driver.save("small", json!(1), None).unwrap();

        let big = json!("x".repeat(198)); // encodes to 200 bytes
        assert!(matches!(
            driver.save("big", big, None),
            Err(CacheError::MemoryLimitExceeded { size: 200, limit: 100 })
        ));
        assert!(driver.exists("small"));
    }

    #[test]
    fn test_increment_auto_creates_and_keeps_expiry() {
        let (driver, clock) = driver();

        assert_eq!(driver.increment("hits", 1).unwrap(), 1);
        assert_eq!(driver.increment("hits", 4).unwrap(), 5);
        assert_eq!(driver.decrement("hits", 2).unwrap(), 3);

        driver.save("ttl", json!(10), Some(5)).unwrap();
        clock.advance_secs(3);
        assert_eq!(driver.increment("ttl", 1).unwrap(), 11);
        clock.advance_secs(3);
        assert!(!driver.exists("ttl"));
    }

    #[test]
    fn test_growing_counter_respects_memory_limit() {
        let (driver, _) = driver();
        driver.set_memory_limit(Some(1)).unwrap();

        driver.save("c", json!(9), None).unwrap();
        assert!(matches!(
            driver.increment("c", 1),
            Err(CacheError::MemoryLimitExceeded { size: 2, limit: 1 })
        ));
        assert_eq!(driver.load("c").unwrap(), json!(9));
        assert!(driver.memory_usage() <= 1);
    }

    #[test]
    fn test_growing_counter_evicts_and_keeps_expiry() {
        let (driver, clock) = driver();
        driver.set_memory_limit(Some(2)).unwrap();

        driver.save("a", json!(1), None).unwrap();
        driver.save("c", json!(9), Some(5)).unwrap();
        clock.advance_secs(3);

        assert_eq!(driver.increment("c", 1).unwrap(), 10);
        assert!(!driver.exists("a"));
        assert_eq!(driver.memory_usage(), 2);
        assert_eq!(driver.stats().evictions, 1);

        clock.advance_secs(3);
        assert!(!driver.exists("c"));
    }

    #[test]
    fn test_increment_non_numeric() {
        let (driver, _) = driver();
        driver.save("name", json!("ada"), None).unwrap();

        assert!(matches!(
            driver.increment("name", 1),
            Err(CacheError::NonNumericValue(_))
        ));
        assert_eq!(driver.load("name").unwrap(), json!("ada"));
    }

    #[test]
    fn test_clean_removes_only_expired() {
        let (driver, clock) = driver();

        driver.save("short", json!(1), Some(1)).unwrap();
        driver.save("long", json!(2), Some(100)).unwrap();
        driver.save("forever", json!(3), Some(0)).unwrap();
        clock.advance_secs(2);

        assert_eq!(driver.clean().unwrap(), 1);
        assert_eq!(driver.count().unwrap(), 2);
        assert_eq!(driver.stats().expirations, 1);
    }

    #[test]
    fn test_batch_operations() {
        let (driver, _) = driver();
        driver.set_memory_limit(Some(10)).unwrap();

        let stored = driver.save_many(
            vec![
                ("a".to_string(), json!(1)),
                ("huge".to_string(), json!("x".repeat(64))),
                ("b".to_string(), json!(2)),
            ],
            None,
        );
        assert_eq!(stored, 2);

        let loaded = driver.load_many(&["a", "b", "huge", "missing"]);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["a"], json!(1));

        assert_eq!(driver.delete_many(&["a", "missing"]), 1);
        driver.clear().unwrap();
        assert_eq!(driver.count().unwrap(), 0);
        assert_eq!(driver.memory_usage(), 0);
    }

    #[test]
    fn test_remember_failure_stores_nothing() {
        let (driver, _) = driver();

        let result = driver.remember("k", None, Box::new(|| Err(anyhow::anyhow!("db down"))));
        assert!(matches!(result, Err(CacheError::Compute(_))));
        assert!(!driver.exists("k"));

        let value = driver.remember("k", Some(0), Box::new(|| Ok(json!("ok")))).unwrap();
        assert_eq!(value, json!("ok"));
        assert_eq!(driver.load("k").unwrap(), json!("ok"));
    }
}
