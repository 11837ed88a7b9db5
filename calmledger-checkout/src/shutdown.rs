//! Shutdown signal handling.
//!
//! [`ShutdownSignal`] listens for SIGTERM and SIGINT on Unix, or Ctrl-C
//! elsewhere, and cancels a [`CancellationToken`] when one arrives. The
//! checkout hands the token to the payment so a signal stops the local wait
//! without touching anything already broadcast.

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Cancels a token on the first shutdown signal.
#[allow(missing_debug_implementations)] // TaskTracker doesn't impl Debug
pub struct ShutdownSignal {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Installs the signal handlers.
    ///
    /// # Errors
    ///
    /// Returns [`std::io::Error`] if a handler cannot be registered.
    #[allow(clippy::unnecessary_wraps)] // Result needed on Unix for signal registration
    pub fn install() -> Result<Self, std::io::Error> {
        let token = CancellationToken::new();
        let inner = token.clone();
        let tracker = TaskTracker::new();

        #[cfg(unix)]
        {
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            tracker.spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                    _ = sigint.recv() => tracing::info!("received Ctrl-C"),
                    () = inner.cancelled() => return,
                }
                inner.cancel();
            });
        }

        #[cfg(not(unix))]
        {
            tracker.spawn(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("received Ctrl-C"),
                    () = inner.cancelled() => return,
                }
                inner.cancel();
            });
        }

        tracker.close();
        Ok(Self { tracker, token })
    }

    /// Token cancelled by the first signal.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stops listening and waits for the listener task to finish.
    pub async fn finish(self) {
        self.token.cancel();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finish_releases_listener() {
        let signal = ShutdownSignal::install().unwrap();
        let token = signal.token();
        assert!(!token.is_cancelled());
        signal.finish().await;
        assert!(token.is_cancelled());
    }
}
