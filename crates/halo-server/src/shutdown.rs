//! Process-wide drain signal.
//!
//! Cancelling the token makes the gateways refuse new sockets, stops the
//! health monitor, and makes the listener tear down every session before it
//! returns. [`ShutdownCoordinator::drain`] bounds how long the binary waits
//! for that to finish.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owner of the relay's cancellation token.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Coordinator with an uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Child-visible clone of the token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start draining. Later calls are no-ops.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("relay draining");
            self.token.cancel();
        }
    }

    /// Whether draining has started.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Start draining and wait up to `limit` for `tasks`.
    ///
    /// Returns `false` if the limit elapsed first; the tasks keep running.
    pub async fn drain(&self, tasks: Vec<JoinHandle<()>>, limit: Duration) -> bool {
        self.shutdown();
        let count = tasks.len();
        let finished = tokio::time::timeout(limit, futures::future::join_all(tasks))
            .await
            .is_ok();
        if !finished {
            let limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
            warn!(tasks = count, limit_ms, "drain limit reached");
        }
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_cancels_handed_out_tokens() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(token.is_cancelled());
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn drain_waits_for_tasks_watching_the_token() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let task = tokio::spawn(async move { token.cancelled().await });
        assert!(coord.drain(vec![task], Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_on_stuck_tasks() {
        let coord = ShutdownCoordinator::new();
        let stuck = tokio::spawn(tokio::time::sleep(Duration::from_secs(3600)));
        assert!(!coord.drain(vec![stuck], Duration::from_millis(50)).await);
        assert!(coord.is_shutting_down());
    }
}
