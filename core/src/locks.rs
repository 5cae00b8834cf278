//! Per-key mutual exclusion with a bounded wait.
//!
//! Holding the guard for a key excludes every other holder of the same key.
//! Distinct keys never wait on each other; the shared table is only locked
//! long enough to mark a key held or released.

use crate::error::{StageError, StageResult};
use std::{
    collections::HashSet,
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

#[derive(Debug)]
pub struct KeyedLocks {
    held:     Mutex<HashSet<String>>,
    released: Condvar,
    timeout:  Duration,
}

impl KeyedLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            held:     Mutex::new(HashSet::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Block until `key` is free, then hold it until the guard drops.
    /// Fails with `StoreUnavailable` once the timeout elapses.
    pub fn acquire(&self, key: &str) -> StageResult<KeyGuard<'_>> {
        let deadline = Instant::now() + self.timeout;
        let mut held = self
            .held
            .lock()
            .map_err(|_| StageError::unavailable("key lock table poisoned"))?;

        while held.contains(key) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::warn!("locks: timed out after {:?} waiting for {key}", self.timeout);
                return Err(StageError::unavailable(format!(
                    "timed out waiting for lock on {key}"
                )));
            }
            let (next, _) = self
                .released
                .wait_timeout(held, remaining)
                .map_err(|_| StageError::unavailable("key lock table poisoned"))?;
            held = next;
        }

        held.insert(key.to_string());
        Ok(KeyGuard { locks: self, key: key.to_string() })
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().map(|h| h.len()).unwrap_or(0)
    }
}

pub struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key:   String,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(|p| p.into_inner());
        held.remove(&self.key);
        drop(held);
        self.locks.released.notify_all();
    }
}
