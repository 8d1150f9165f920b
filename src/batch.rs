//! Opaque batching-context handles.
//!
//! The ingest core never looks inside a batching context: it opens one with a
//! capacity, feeds it command bytes, and releases it. Flush policy, output
//! format, and storage belong to the [`Batcher`] implementation.

use std::fmt;
use std::sync::Mutex;

use tracing::debug;

/// Factory for batching contexts.
///
/// The shared context is fed concurrently from every connection task, so
/// implementations must accept `feed` calls through `&self` from multiple
/// tasks at once. A private context is only ever fed by its own session.
pub trait Batcher: Send + Sync + 'static {
    /// Open a batching context with the given flush threshold.
    ///
    /// Returns `None` when the accumulator cannot allocate a context; callers
    /// must tolerate that instead of treating it as fatal.
    fn open(&self, capacity: usize) -> Option<BatchHandle>;
}

/// One open batching context.
///
/// Ingests commands one at a time, already stripped of line terminators.
pub trait BatchContext: Send + Sync {
    /// Ingest exactly one command.
    fn feed(&self, command: &[u8]);

    /// Called once when the handle is released.
    fn close(&self);
}

/// Owning handle to a batching context.
///
/// Releasing the context happens in `Drop`, so a handle is torn down exactly
/// once no matter which path (disconnect or forced shutdown) ends the owning
/// session.
pub struct BatchHandle {
    ctx: Box<dyn BatchContext>,
}

impl BatchHandle {
    pub fn new(ctx: Box<dyn BatchContext>) -> Self {
        BatchHandle { ctx }
    }

    pub fn feed(&self, command: &[u8]) {
        self.ctx.feed(command);
    }
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        self.ctx.close();
    }
}

impl fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchHandle").finish_non_exhaustive()
    }
}

/// Default accumulator: groups commands into bulks of `capacity` and prints
/// each completed bulk as a `bulk: a, b, c` line on stdout. A partial bulk is
/// flushed when the context closes.
pub struct StdoutBatcher;

impl Batcher for StdoutBatcher {
    fn open(&self, capacity: usize) -> Option<BatchHandle> {
        if capacity == 0 {
            return None;
        }

        debug!(capacity, "opening stdout batch context");
        Some(BatchHandle::new(Box::new(StdoutContext {
            capacity,
            pending: Mutex::new(Vec::with_capacity(capacity)),
        })))
    }
}

struct StdoutContext {
    capacity: usize,
    pending: Mutex<Vec<String>>,
}

impl StdoutContext {
    fn flush(pending: &mut Vec<String>) {
        if pending.is_empty() {
            return;
        }
        println!("bulk: {}", pending.join(", "));
        pending.clear();
    }
}

impl BatchContext for StdoutContext {
    fn feed(&self, command: &[u8]) {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        pending.push(String::from_utf8_lossy(command).into_owned());
        if pending.len() >= self.capacity {
            Self::flush(&mut pending);
        }
    }

    fn close(&self) {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Self::flush(&mut pending);
    }
}

#[cfg(test)]
pub mod testing {
    //! Recording batcher used by session and server tests.

    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Everything a [`Recording`] batcher has observed.
    #[derive(Debug, Default)]
    pub struct Log {
        /// `(context_id, command)` in feed order.
        pub feeds: Vec<(u64, String)>,
        /// Context ids that have been closed, in close order.
        pub closed: Vec<u64>,
    }

    /// Batcher whose contexts record every feed and close into a shared log.
    #[derive(Default)]
    pub struct Recording {
        next_id: AtomicU64,
        log: Arc<Mutex<Log>>,
    }

    impl Recording {
        pub fn new() -> Self {
            Recording::default()
        }

        pub fn log(&self) -> Arc<Mutex<Log>> {
            Arc::clone(&self.log)
        }

        /// Commands fed to the given context, in order.
        pub fn fed_to(&self, id: u64) -> Vec<String> {
            let log = self.log.lock().unwrap();
            log.feeds
                .iter()
                .filter(|(ctx, _)| *ctx == id)
                .map(|(_, cmd)| cmd.clone())
                .collect()
        }

        pub fn close_count(&self, id: u64) -> usize {
            let log = self.log.lock().unwrap();
            log.closed.iter().filter(|&&ctx| ctx == id).count()
        }
    }

    impl Batcher for Recording {
        fn open(&self, _capacity: usize) -> Option<BatchHandle> {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            Some(BatchHandle::new(Box::new(RecordingContext {
                id,
                log: Arc::clone(&self.log),
            })))
        }
    }

    struct RecordingContext {
        id: u64,
        log: Arc<Mutex<Log>>,
    }

    impl BatchContext for RecordingContext {
        fn feed(&self, command: &[u8]) {
            let mut log = self.log.lock().unwrap();
            log.feeds
                .push((self.id, String::from_utf8_lossy(command).into_owned()));
        }

        fn close(&self) {
            let mut log = self.log.lock().unwrap();
            log.closed.push(self.id);
        }
    }

    /// Batcher that refuses to open any context.
    pub struct Refusing;

    impl Batcher for Refusing {
        fn open(&self, _capacity: usize) -> Option<BatchHandle> {
            None
        }
    }
}
