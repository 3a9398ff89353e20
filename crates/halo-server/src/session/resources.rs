//! Per-session timers and background tasks.
//!
//! Everything a session spawns goes through its tracker, so teardown can
//! cancel it all in one call.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// Owns a session's timers.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    token: CancellationToken,
    tasks: Mutex<Vec<AbortHandle>>,
    disposed: AtomicBool,
}

impl ResourceTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task that is cancelled on [`dispose`](Self::dispose).
    ///
    /// Returns `false` without spawning once disposed.
    pub fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        if self.is_disposed() {
            return false;
        }
        tasks.retain(|t| !t.is_finished());
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = task => {}
            }
        });
        tasks.push(handle.abort_handle());
        true
    }

    /// Run `fire` once after `delay`, unless disposed first.
    pub fn spawn_after<F>(&self, delay: Duration, fire: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        })
    }

    /// Cancel every tracked task. Only the first call does anything.
    pub fn dispose(&self) -> bool {
        let mut tasks = self.tasks.lock();
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        for task in tasks.drain(..) {
            task.abort();
        }
        true
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Number of tasks still running.
    pub fn active(&self) -> usize {
        self.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }
}
