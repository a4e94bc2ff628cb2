//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside a driver.
//!
//! # Tasks
//! - Expiry sweep: calls `Driver::clean` at a configured interval

mod cleanup;

pub use cleanup::spawn_cleanup_task;
