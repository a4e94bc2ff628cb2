//! Expiry Sweep Task
//!
//! Background task that periodically removes expired cache entries. Reads
//! already drop expired entries lazily; the sweep reclaims the ones nobody
//! reads again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::driver::Driver;

/// Spawns a background task that periodically sweeps expired entries.
///
/// The task runs in an infinite loop, sleeping for the specified interval
/// between sweeps. Each sweep runs on the blocking pool because the file
/// driver walks its directory and may wait on file locks.
///
/// # Arguments
/// * `driver` - Shared driver to sweep
/// * `cleanup_interval_secs` - Interval in seconds between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(MemoryDriver::new());
/// let cleanup_handle = spawn_cleanup_task(cache.clone(), 60);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task<D>(driver: Arc<D>, cleanup_interval_secs: u64) -> JoinHandle<()>
where
    D: Driver + ?Sized + 'static,
{
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting expiry sweep task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let sweep = {
                let driver = Arc::clone(&driver);
                tokio::task::spawn_blocking(move || driver.clean())
            };

            match sweep.await {
                Ok(Ok(removed)) if removed > 0 => {
                    info!("Expiry sweep: removed {} expired entries", removed);
                }
                Ok(Ok(_)) => debug!("Expiry sweep: no expired entries found"),
                Ok(Err(err)) => error!(error = %err, "Expiry sweep failed"),
                Err(err) => error!(error = %err, "Expiry sweep task panicked"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryDriver;
    use crate::clock::ManualClock;
    use serde_json::json;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let clock = ManualClock::default();
        let cache = Arc::new(MemoryDriver::with_clock(clock.shared()));

        assert_ok!(cache.save("expire_soon", json!("value"), Some(1)));
        assert_ok!(cache.save("long_lived", json!("value"), Some(3600)));
        clock.advance_secs(2);

        let handle = spawn_cleanup_task(cache.clone(), 1);

        // Wait for the first sweep to run
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // Swept, not lazily dropped: count reflects physical occupancy
        assert_eq!(assert_ok!(cache.count()), 1);
        assert!(cache.exists("long_lived"));

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_accepts_trait_objects() {
        let cache: Arc<dyn Driver> = Arc::new(MemoryDriver::new());

        let handle = spawn_cleanup_task(cache, 1);
        handle.abort();

        // Wait a bit and verify task is finished
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
