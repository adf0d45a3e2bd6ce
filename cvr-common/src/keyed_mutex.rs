//! Per-key serialization of async operations
//!
//! `KeyedMutex` guarantees at most one in-flight operation per key. Later
//! arrivals for the same key queue behind the current holder and start, in
//! arrival order, once their predecessor settles. A predecessor settles on
//! success, on failure, and when its future is dropped. A waiter dropped
//! before its turn leaves the queue without releasing anyone early.
//!
//! The holder table is process-local. It serializes work inside one service
//! instance only.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

/// Per-key queue plus the number of callers registered on it
struct Slot {
    gate: Arc<tokio::sync::Mutex<()>>,
    registered: usize,
}

/// Per-key mutual exclusion for async operations
pub struct KeyedMutex<K> {
    slots: Mutex<HashMap<K, Slot>>,
}

impl<K> Default for KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Run `operation` once no earlier operation for `key` is in flight
    ///
    /// The tokio mutex behind each key is fair, so callers start in the
    /// order they first polled. Errors returned by `operation` reach only
    /// this caller; queued waiters merely observe that it settled.
    pub async fn run_exclusive<F, Fut, T, E>(&self, key: K, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let gate = {
            let mut slots = self.lock_slots();
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
                gate: Arc::new(tokio::sync::Mutex::new(())),
                registered: 0,
            });
            slot.registered += 1;
            Arc::clone(&slot.gate)
        };

        // Drops the slot once the last registered caller leaves, on every exit path
        let _registration = Registration { owner: self, key };

        let _turn = gate.lock().await;
        operation().await
    }

    /// Number of keys with a holder or queued waiter
    pub fn held_keys(&self) -> usize {
        self.lock_slots().len()
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<K, Slot>> {
        // Critical sections never panic mid-update, so a poisoned map is still consistent.
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Registration<'a, K>
where
    K: Eq + Hash + Clone,
{
    owner: &'a KeyedMutex<K>,
    key: K,
}

impl<K> Drop for Registration<'_, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        let mut slots = self.owner.lock_slots();
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.registered -= 1;
            if slot.registered == 0 {
                slots.remove(&self.key);
            }
        }
    }
}
