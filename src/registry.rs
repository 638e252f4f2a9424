//! Registry of live connection tasks.
//!
//! Owned by the serve loop alone; connection tasks report completion over a
//! channel instead of touching the registry. Dropping the registry aborts
//! every task still in it, which is how a timed-out drain forcibly ends the
//! remaining connections.

use slab::Slab;
use tokio::task::AbortHandle;

/// Slab of abort handles keyed by connection id.
///
/// Provides O(1) insert and remove.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Slab<AbortHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. `spawn` receives the id the task will be stored
    /// under, so the task can report it back when it finishes.
    pub fn insert_with<F>(&mut self, spawn: F) -> usize
    where
        F: FnOnce(usize) -> AbortHandle,
    {
        let entry = self.connections.vacant_entry();
        let id = entry.key();
        entry.insert(spawn(id));
        id
    }

    /// Remove a finished connection. Unknown ids are ignored.
    pub fn remove(&mut self, id: usize) -> bool {
        self.connections.try_remove(id).is_some()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Abort every registered connection task.
    pub fn abort_all(&mut self) {
        for handle in self.connections.drain() {
            handle.abort();
        }
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        self.abort_all();
    }
}
