//! Cancellation of a running import.

use tokio_util::sync::CancellationToken;

/// Answers "has this run been asked to stop?".
///
/// Cloning shares the underlying flag, so the queue keeps one clone to request cancellation while
/// the coordinator and fetcher consult theirs.
#[derive(Debug, Clone, Default)]
pub struct CancellationMonitor {
    token: CancellationToken,
}

impl CancellationMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.token.cancel();
    }

    /// Cheap and side-effect free
    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested
    pub async fn requested(&self) {
        self.token.cancelled().await
    }
}
