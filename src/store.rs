//! Process-wide per-thread message store.
//!
//! DESIGN
//! ======
//! Each thread maps to an immutable snapshot (`Arc<[ThreadMessage]>`).
//! The reconciler is the only writer and always replaces a thread's whole
//! snapshot, so readers holding an older `Arc` never observe a partial
//! update and never need to lock beyond the map lookup.
//!
//! Every write bumps a revision on a `watch` channel so presentation layers
//! can await changes instead of polling.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;

use crate::types::{ThreadId, ThreadMessage};

#[derive(Clone)]
pub struct ThreadMessageStore {
    threads: Arc<RwLock<HashMap<ThreadId, Arc<[ThreadMessage]>>>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for ThreadMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadMessageStore {
    #[must_use]
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self { threads: Arc::new(RwLock::new(HashMap::new())), revision: Arc::new(revision) }
    }

    /// Current snapshot of a thread; empty if the thread is unknown.
    #[must_use]
    pub fn get(&self, thread_id: ThreadId) -> Arc<[ThreadMessage]> {
        let threads = self.threads.read().unwrap_or_else(PoisonError::into_inner);
        threads.get(&thread_id).cloned().unwrap_or_else(|| Arc::from(Vec::new()))
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, thread_id: ThreadId) -> bool {
        let threads = self.threads.read().unwrap_or_else(PoisonError::into_inner);
        threads.contains_key(&thread_id)
    }

    /// Threads that currently hold a sequence, in ascending id order.
    #[must_use]
    pub fn threads(&self) -> Vec<ThreadId> {
        let threads = self.threads.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = threads.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Remove everything stored for one thread.
    pub fn clear(&self, thread_id: ThreadId) {
        let removed = {
            let mut threads = self.threads.write().unwrap_or_else(PoisonError::into_inner);
            threads.remove(&thread_id).is_some()
        };
        if removed {
            self.bump();
        }
    }

    /// Remove every thread (logout).
    pub fn clear_all(&self) {
        {
            let mut threads = self.threads.write().unwrap_or_else(PoisonError::into_inner);
            threads.clear();
        }
        self.bump();
    }

    /// Monotonic write counter.
    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Receiver that changes whenever any thread is written or cleared.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Atomically replace a thread's sequence. Reconciler only.
    pub(crate) fn replace(&self, thread_id: ThreadId, messages: Vec<ThreadMessage>) {
        {
            let mut threads = self.threads.write().unwrap_or_else(PoisonError::into_inner);
            threads.insert(thread_id, Arc::from(messages));
        }
        self.bump();
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}
