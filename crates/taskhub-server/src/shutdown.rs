//! Graceful shutdown: one `CancellationToken` shared by the HTTP listener
//! and the hub loop, the join handles to wait on, and a tracker for
//! per-connection client pumps.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default timeout for graceful shutdown before giving up on tasks.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates graceful shutdown across all server tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    connections: TaskTracker,
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

    /// Wait on `handle` during [`graceful_shutdown`](Self::graceful_shutdown).
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Tracker for client connection tasks.
    ///
    /// Connections are drained after the tracked tasks, so a hub loop that
    /// closes every mailbox on cancel lets each write pump flush its close
    /// frame before [`graceful_shutdown`](Self::graceful_shutdown) returns.
    pub fn connections(&self) -> &TaskTracker {
        &self.connections
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, then wait up to `timeout` for every tracked task
    /// and connection.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        let handles = std::mem::take(&mut *self.tasks.lock());

        self.shutdown();
        let _ = self.connections.close();
        info!(
            task_count = handles.len(),
            connection_count = self.connections.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let drain = async {
            let _ = futures::future::join_all(handles).await;
            self.connections.wait().await;
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                let _ = signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        assert!(!ShutdownCoordinator::new().is_shutting_down());
    }

    #[test]
    fn shutdown_cancels_every_token() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let t2 = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_tracked_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        coord.track(tokio::spawn(async move {
            token.cancelled().await;
            let _ = done_tx.send(());
        }));

        coord.graceful_shutdown(None).await;
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test]
    async fn graceful_shutdown_drains_connections() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let (done_tx, mut done_rx) = tokio::sync::oneshot::channel();
        let _ = coord.connections().spawn(async move {
            token.cancelled().await;
            // A write pump still has to flush after the cancel
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = done_tx.send(());
        });

        coord.graceful_shutdown(None).await;
        assert!(done_rx.try_recv().is_ok());
        assert!(coord.connections().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        coord.track(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        }));

        coord
            .graceful_shutdown(Some(Duration::from_millis(100)))
            .await;
        assert!(coord.is_shutting_down());
    }
}
