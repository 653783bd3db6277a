//! Server drain: stop accepting, close sockets with 1001, wait for the
//! connection tasks.
//!
//! Every accepted socket's task is registered with a [`TaskTracker`]; the
//! shared [`CancellationToken`] is what `Hub::serve_socket` selects on to send
//! the going-away close.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};

/// Shared stop signal plus the set of live connection tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    connections: TaskTracker,
}

impl ShutdownCoordinator {
    /// Coordinator with no connections and no stop requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that fires when the drain starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wrap a connection task so the drain waits for it.
    pub fn track_connection<F: Future>(&self, task: F) -> TrackedFuture<F> {
        self.connections.track_future(task)
    }

    /// Connection tasks still running.
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Fire the stop signal. Repeated calls are no-ops.
    pub fn begin(&self) {
        self.token.cancel();
    }

    /// Whether the drain has started; new upgrades are refused from then on.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the stop signal and wait for the accept loop and every tracked
    /// connection, up to `timeout`. Returns `false` on timeout.
    pub async fn drain(&self, server: JoinHandle<()>, timeout: Duration) -> bool {
        self.begin();
        let _ = self.connections.close();
        info!(
            connections = self.connections.len(),
            timeout_secs = timeout.as_secs(),
            "draining connections"
        );

        let connections = self.connections.clone();
        let wait = async move {
            if let Err(e) = server.await {
                warn!(error = %e, "accept loop ended abnormally");
            }
            connections.wait().await;
        };

        let finished = tokio::time::timeout(timeout, wait).await.is_ok();
        if !finished {
            warn!(
                remaining = self.connections.len(),
                "drain timed out after {timeout:?}, abandoning remaining connections"
            );
        }
        finished
    }
}
