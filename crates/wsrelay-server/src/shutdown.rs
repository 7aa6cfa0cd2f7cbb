//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default time sessions get to finish their close handshakes.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Signals shutdown to every session and waits for them to drain.
#[derive(Clone, Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Tracker that session tasks are spawned on.
    pub fn tracker(&self) -> &TaskTracker {
        &self.sessions
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel every session and wait up to `timeout` for them to exit.
    ///
    /// Returns `false` if some sessions were still running at the deadline.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let _ = self.sessions.close();
        info!(
            session_count = self.sessions.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for sessions to close"
        );

        if tokio::time::timeout(timeout, self.sessions.wait()).await.is_err() {
            warn!(
                remaining = self.sessions.len(),
                "shutdown timed out after {timeout:?}, some sessions may still be running"
            );
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn token_propagation() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!token.is_cancelled());
        coord.shutdown();
        coord.shutdown();
        assert!(token.is_cancelled());
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_sessions() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let _ = coord.tracker().spawn(async move {
            token.cancelled().await;
        });

        assert!(coord.graceful_shutdown(None).await);
        assert!(coord.tracker().is_empty());
    }

    #[tokio::test]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        // Ignores cancellation.
        let _ = coord.tracker().spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        let drained = coord
            .graceful_shutdown(Some(Duration::from_millis(100)))
            .await;
        assert!(!drained);
        assert!(coord.is_shutting_down());
    }
}
