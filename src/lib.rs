//! Cache Engine - An embeddable key-value cache
//!
//! One [`Driver`] contract with two backends: [`FileDriver`] persists each entry
//! as a checksummed record file and coordinates through advisory file locks,
//! [`MemoryDriver`] keeps a bounded LRU table in process. Both support TTL
//! expiry, atomic counters and single-flight `remember`.
//!
//! ```no_run
//! use cache_engine::{Driver, MemoryDriver};
//! use serde_json::json;
//!
//! let cache = MemoryDriver::new();
//! cache.save("greeting", json!("hello"), Some(60))?;
//! assert_eq!(cache.load("greeting")?, json!("hello"));
//! # Ok::<(), cache_engine::CacheError>(())
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod tasks;

pub use cache::{CacheStats, FileDriver, MemoryDriver};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use driver::{Compute, Driver, DriverExt};
pub use error::{CacheError, Result};
pub use tasks::spawn_cleanup_task;
