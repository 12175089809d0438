//! Cooperative shutdown.
//!
//! One [`CancellationToken`] is shared by everything with a suspension point.
//! Requesting shutdown only stops new work from being created; work already
//! running (test programs included) finishes or times out on its own.

use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Owner of the shutdown signal for one process.
#[derive(Debug, Clone, Default)]
pub struct ShutdownController {
    token: CancellationToken,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The token to hand to components.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request shutdown. Only the first request is logged.
    pub fn request(&self, reason: &str) {
        if !self.token.is_cancelled() {
            warn!(
                "Shutdown requested ({}), waiting for running work to finish",
                reason
            );
        }
        self.token.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request shutdown on SIGINT or SIGTERM.
    ///
    /// Handlers are installed before this returns. The listener exits after
    /// the first signal or once shutdown was requested some other way.
    pub fn listen_for_signals(&self) -> std::io::Result<JoinHandle<()>> {
        let mut terminate = unix_signal(SignalKind::terminate())?;
        let mut interrupt = unix_signal(SignalKind::interrupt())?;
        let controller = self.clone();

        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = controller.token.cancelled() => {}
                _ = interrupt.recv() => controller.request("SIGINT"),
                _ = terminate.recv() => controller.request("SIGTERM"),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_request_is_idempotent() {
        let controller = ShutdownController::new();
        let token = controller.token();
        assert!(!controller.is_requested());

        controller.request("test");
        controller.request("test again");
        assert!(controller.is_requested());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_clones_share_the_signal() {
        let controller = ShutdownController::new();
        let other = controller.clone();
        let token = controller.token();

        other.request("test");
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_signal_listener_exits_on_manual_request() {
        let controller = ShutdownController::new();
        let listener = controller.listen_for_signals().unwrap();

        controller.request("test");
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .unwrap()
            .unwrap();
    }
}
