//! Process-wide shutdown signal shared by the HTTP server and the hub.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long `drain` waits for tracked tasks when no timeout is given.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the root [`CancellationToken`]. The hub loop, the axum graceful
/// shutdown future and the binary all observe clones of it.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
        }
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve on ctrl-c or when another caller triggers shutdown.
    pub async fn wait_for_signal(&self) {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                self.trigger();
            }
            () = self.token.cancelled() => {}
        }
    }

    /// Trigger shutdown, then wait up to `timeout` for `handles` to finish.
    /// Tasks still running afterwards are aborted.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.trigger();
        info!(
            task_count = handles.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "draining tasks"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!(?timeout, "drain timed out, aborting remaining tasks");
            for handle in aborts {
                handle.abort();
            }
        }
    }
}
