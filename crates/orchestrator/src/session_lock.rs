//! Concurrency control for `process` calls.
//!
//! Two layers: a per-session `Semaphore(1)` serializes turns on the same
//! session in arrival order, and a global semaphore sheds load once the
//! configured inflight limit is reached (no unbounded queueing).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Per-session run locks.
pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for a session, waiting behind any turn already in
    /// flight. The permit releases on drop.
    pub async fn acquire(&self, session_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned()
            .await
            .expect("session semaphore never closes")
    }

    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop lock entries for sessions with no turn in flight.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

/// Global inflight limiter. `try_admit` returns `None` when the process
/// is at capacity; the caller answers `overloaded` immediately.
pub struct InflightGate {
    permits: Arc<Semaphore>,
}

impl InflightGate {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    pub fn try_admit(&self) -> Option<OwnedSemaphorePermit> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(TryAcquireError::NoPermits) => None,
            Err(TryAcquireError::Closed) => None,
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
