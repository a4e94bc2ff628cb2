//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::path::PathBuf;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible
/// defaults. Limits stay signed here; the driver setters validate them.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Default TTL in seconds for entries saved without one (0 = never expire)
    pub default_ttl: Option<i64>,
    /// Maximum number of entries held by a memory driver
    pub max_items: Option<i64>,
    /// Maximum total encoded bytes held by a memory driver
    pub memory_limit: Option<i64>,
    /// Root directory of a file driver
    pub directory: PathBuf,
    /// Background sweep interval in seconds
    pub cleanup_interval: u64,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `CACHE_MAX_ITEMS` - Memory driver item limit (default: unlimited)
    /// - `CACHE_MEMORY_LIMIT` - Memory driver byte limit (default: unlimited)
    /// - `CACHE_DIRECTORY` - File driver root (default: ./cache)
    /// - `CACHE_CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_ttl: parse_var("CACHE_DEFAULT_TTL").or(defaults.default_ttl),
            max_items: parse_var("CACHE_MAX_ITEMS").or(defaults.max_items),
            memory_limit: parse_var("CACHE_MEMORY_LIMIT").or(defaults.memory_limit),
            directory: env::var("CACHE_DIRECTORY")
                .ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.directory),
            cleanup_interval: parse_var("CACHE_CLEANUP_INTERVAL")
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.cleanup_interval),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Some(300),
            max_items: None,
            memory_limit: None,
            directory: PathBuf::from("./cache"),
            cleanup_interval: 60,
        }
    }
}
