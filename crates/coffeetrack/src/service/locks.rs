use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// One mutex per batch, created on first use and dropped once no writer
/// holds it.
///
/// Writers hold a batch's lock across read, validate and insert. Batches
/// never contend with each other.
#[derive(Default)]
pub(crate) struct BatchLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BatchLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock_for(&self, batch_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // Handles are only cloned under the map lock, so a count of one
        // means nobody holds or waits on that batch.
        locks.retain(|id, lock| id == batch_id || Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(batch_id.to_string()).or_default())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

/// Acquires a batch lock. The guarded value is `()`, so a panic in another
/// holder leaves nothing inconsistent and poisoning is ignored.
pub(crate) fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|p| p.into_inner())
}
