//! Cache Module
//!
//! The two driver backends and the pieces they share: entry model, record
//! codec, LRU tracking, statistics and single-flight coordination.

pub mod codec;
mod entry;
mod file_driver;
mod file_lock;
mod flight;
pub mod key_path;
mod lru;
mod memory;
mod stats;


// Re-export public types
pub use entry::{resolve_ttl, CacheEntry};
pub use file_driver::FileDriver;
pub use file_lock::FileLock;
pub use flight::SingleFlight;
pub use key_path::KeyPath;
pub use lru::LruTracker;
pub use memory::MemoryDriver;
pub use stats::{CacheStats, StatsCounters};
