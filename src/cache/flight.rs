//! Single-Flight Module
//!
//! Per-key coalescing of `remember` computations inside one driver instance.
//! The first caller for a key becomes the leader and computes; callers arriving
//! while it runs park on a condition variable and re-probe once it lands. Keys
//! never block each other.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

#[derive(Debug, Default)]
struct Flight {
    landed: Mutex<bool>,
    signal: Condvar,
}

// == Single Flight ==
/// Registry of in-flight computations, keyed by cache key.
#[derive(Debug, Default)]
pub struct SingleFlight {
    flights: Mutex<HashMap<String, Arc<Flight>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims leadership for `key`, or waits for the current leader to finish.
    ///
    /// Returns `Some` to the leader. Followers get `None` after the leader's
    /// guard has dropped, whether it succeeded, failed or panicked.
    pub fn join(&self, key: &str) -> Option<Leader<'_>> {
        let flight = {
            let mut flights = self.flights.lock();
            match flights.get(key) {
                Some(flight) => Arc::clone(flight),
                None => {
                    let flight = Arc::new(Flight::default());
                    flights.insert(key.to_string(), Arc::clone(&flight));
                    return Some(Leader {
                        group: self,
                        key: key.to_string(),
                        flight,
                    });
                }
            }
        };

        debug!(key, "waiting on in-flight computation");
        let mut landed = flight.landed.lock();
        while !*landed {
            flight.signal.wait(&mut landed);
        }
        None
    }

    // == Run ==
    /// Drives the remember protocol for `key`.
    ///
    /// `probe` looks for a live value and is re-run after every wait and once
    /// more after leadership is claimed. `fill` runs at most once per caller, and
    /// only while that caller leads the key.
    pub fn run<P, F>(&self, key: &str, probe: P, fill: F) -> Result<Value>
    where
        P: Fn() -> Result<Option<Value>>,
        F: FnOnce() -> Result<Value>,
    {
        let _leader = loop {
            if let Some(value) = probe()? {
                return Ok(value);
            }
            if let Some(leader) = self.join(key) {
                break leader;
            }
        };

        if let Some(value) = probe()? {
            return Ok(value);
        }
        fill()
    }

    /// Number of keys with a computation in progress.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}

// == Leader ==
/// Held by the caller computing a key; releases waiters on drop.
#[derive(Debug)]
pub struct Leader<'a> {
    group: &'a SingleFlight,
    key: String,
    flight: Arc<Flight>,
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        {
            let mut flights = self.group.flights.lock();
            if flights
                .get(&self.key)
                .is_some_and(|current| Arc::ptr_eq(current, &self.flight))
            {
                flights.remove(&self.key);
            }
        }

        *self.flight.landed.lock() = true;
        self.flight.signal.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_leader_then_release() {
        let group = SingleFlight::new();

        let leader = group.join("k");
        assert!(leader.is_some());
        assert_eq!(group.in_flight(), 1);

        drop(leader);
        assert_eq!(group.in_flight(), 0);
        assert!(group.join("k").is_some());
    }

    #[test]
    fn test_concurrent_run_fills_once() {
        let group = Arc::new(SingleFlight::new());
        let slot: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let fills = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (group, slot, fills, barrier) = (
                    Arc::clone(&group),
                    Arc::clone(&slot),
                    Arc::clone(&fills),
                    Arc::clone(&barrier),
                );
                thread::spawn(move || {
                    barrier.wait();
                    group.run(
                        "k",
                        || Ok(slot.lock().clone()),
                        || {
                            fills.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            *slot.lock() = Some(json!("computed"));
                            Ok(json!("computed"))
                        },
                    )
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), json!("computed"));
        }
        assert_eq!(fills.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_fill_lets_next_caller_lead() {
        let group = SingleFlight::new();

        let first = group.run(
            "k",
            || Ok(None),
            || Err(CacheError::Compute(anyhow::anyhow!("boom"))),
        );
        assert!(matches!(first, Err(CacheError::Compute(_))));

        let second = group.run("k", || Ok(None), || Ok(json!(2)));
        assert_eq!(second.unwrap(), json!(2));
    }
}
