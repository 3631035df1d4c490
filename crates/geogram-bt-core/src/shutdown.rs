//! Cooperative stop requests.
//!
//! The signal task, the test-mode timer and the pairing agent may all ask the
//! event loop to finish. None of them touch loop state: they set a flag and
//! wake the loop, which then runs its own cleanup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::info;

/// Cloneable, thread-safe stop request.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    /// Create a handle with no stop requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop. Safe to call from any task, any number of times.
    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolve once a stop has been requested.
    pub async fn stopped(&self) {
        while !self.is_stop_requested() {
            self.notify.notified().await;
        }
    }
}

/// Request a stop on SIGINT or SIGTERM.
///
/// The listeners are created before this returns so a failure to install
/// them is reported to the caller instead of being lost in a task.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be registered.
#[cfg(unix)]
pub fn install_signal_handlers(stop: StopHandle) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating shutdown...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            }
        }
        stop.request_stop();
    });

    Ok(())
}

/// Request a stop on Ctrl+C.
///
/// # Errors
///
/// Never fails on this platform; the signature matches the Unix variant.
#[cfg(not(unix))]
pub fn install_signal_handlers(stop: StopHandle) -> std::io::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, initiating shutdown...");
            stop.request_stop();
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_request_stop_sets_flag_on_all_clones() {
        let stop = StopHandle::new();
        let clone = stop.clone();
        assert!(!clone.is_stop_requested());

        stop.request_stop();
        assert!(clone.is_stop_requested());
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_request() {
        let stop = StopHandle::new();
        let waiter = stop.clone();

        let handle = tokio::spawn(async move { waiter.stopped().await });
        tokio::task::yield_now().await;
        stop.request_stop();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("stopped() should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_requested_before_wait_is_not_lost() {
        let stop = StopHandle::new();
        stop.request_stop();

        tokio::time::timeout(Duration::from_secs(1), stop.stopped())
            .await
            .expect("stopped() should resolve immediately");
    }
}
