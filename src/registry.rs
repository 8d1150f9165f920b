//! Registry of live client sessions.
//!
//! The accept loop inserts an entry before spawning a session task; the
//! session removes itself on disconnect; shutdown drains the remaining
//! entries one at a time. All mutation goes through a single mutex so an
//! entry can never be lost or handed out twice between a disconnect and a
//! concurrent drain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tracing::trace;

/// Identifier for one registered session.
pub type SessionId = u64;

struct Entry {
    /// Attached after spawn; a drained entry with no task was registered but
    /// never attached, which cannot happen once the accept loop has stopped.
    task: Option<JoinHandle<()>>,
}

/// Thread-safe collection of live sessions.
///
/// Never exposes its underlying map; callers get exactly the insert, attach,
/// remove, and drain-one operations the lifecycle needs.
#[derive(Default)]
pub struct Registry {
    sessions: Mutex<HashMap<SessionId, Entry>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Register a new session and return its id. Called by the accept loop
    /// before the session task is spawned, so membership starts at accept.
    pub fn insert(&self) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.lock();
        sessions.insert(id, Entry { task: None });
        trace!(session = id, "session registered");
        id
    }

    /// Attach the spawned task's handle to an entry. A no-op if the session
    /// already removed itself, so a fast disconnect leaves no stale entry.
    pub fn attach(&self, id: SessionId, task: JoinHandle<()>) {
        let mut sessions = self.lock();
        if let Some(entry) = sessions.get_mut(&id) {
            entry.task = Some(task);
        }
    }

    /// Remove a session. Called by the session itself on disconnect; returns
    /// `false` if the entry was already drained by shutdown.
    pub fn remove(&self, id: SessionId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            trace!(session = id, "session deregistered");
        }
        removed
    }

    /// Pop one entry for the shutdown drain, returning its task handle so the
    /// caller can await it outside the lock. Entries that were never attached
    /// are discarded rather than ending the drain early.
    pub fn pop(&self) -> Option<JoinHandle<()>> {
        let mut sessions = self.lock();
        loop {
            let id = sessions.keys().next().copied()?;
            let entry = sessions.remove(&id)?;
            trace!(session = id, "session drained");
            if let Some(task) = entry.task {
                return Some(task);
            }
        }
    }

    /// Number of live sessions.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Entry>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
