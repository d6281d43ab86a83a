//! Worker thread pool
//!
//! Spawns one named OS thread per task and tracks the handles so the
//! shutdown path can drain everything that is still running.

use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Tracks every worker spawned on behalf of the scheduler.
#[derive(Default)]
pub struct SubServer {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SubServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a named worker thread.
    pub fn enqueue(&self, label: impl Into<String>, task: impl FnOnce() + Send + 'static) {
        let label = label.into();
        debug!(worker = %label, "worker enqueued");
        let handle = thread::Builder::new()
            .name(label.clone())
            .spawn(task)
            .unwrap_or_else(|err| panic!("failed to spawn worker {label}: {err}"));
        self.handles.lock().push(handle);
    }

    /// Number of workers spawned and not yet reaped.
    #[must_use]
    pub fn active(&self) -> usize {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.len()
    }

    /// Join every remaining worker, including ones enqueued while the
    /// drain is running.
    pub fn wait_all_remaining(&self) {
        loop {
            let batch: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
            if batch.is_empty() {
                break;
            }
            for handle in batch {
                let name = handle.thread().name().unwrap_or("worker").to_string();
                if handle.join().is_err() {
                    warn!(worker = %name, "worker panicked");
                }
            }
        }
    }
}
