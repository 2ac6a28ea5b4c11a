//! Cooperative run cancellation
//!
//! A `CancelHandle` owns the trigger; every run gets a cheap `CancelSignal`
//! that is checked between stages and raced against every sleep.

use crate::error::{ProvisionError, ProvisionResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Trigger side of cancellation
#[derive(Clone)]
pub struct CancelHandle {
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
    is_cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
            is_cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a signal for one run
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.cancel_rx.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_cancelled.load(Ordering::SeqCst)
    }

    /// Request cancellation of every run holding a signal
    pub fn cancel(&self) {
        if self.is_cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Cancellation requested");
        let _ = self.cancel_tx.send(true);
    }

    /// Wait for SIGINT/SIGTERM (Ctrl+C elsewhere) and cancel
    pub async fn cancel_on_os_signal(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
            ) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                        _ = sigint.recv() => info!("Received SIGINT"),
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to register signal handlers, falling back to Ctrl+C");
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!(error = %e, "Failed to listen for Ctrl+C");
                        return;
                    }
                    info!("Received Ctrl+C");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            info!("Received Ctrl+C");
        }

        self.cancel();
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of cancellation, one per run
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Fail with `Cancelled` if cancellation was requested
    pub fn check(&self) -> ProvisionResult<()> {
        if self.is_cancelled() {
            Err(ProvisionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once cancellation is requested
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Trigger dropped without cancelling
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep for `duration` unless cancelled first
    pub async fn sleep(&self, duration: Duration) -> ProvisionResult<()> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ProvisionError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_reaches_every_signal() {
        let handle = CancelHandle::new();
        let a = handle.signal();
        let b = handle.signal();
        assert!(!a.is_cancelled());

        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(matches!(a.check(), Err(ProvisionError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let handle = CancelHandle::new();
        handle.cancel();
        handle.cancel();
        assert!(handle.signal().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_is_interrupted() {
        let handle = CancelHandle::new();
        let signal = handle.signal();

        let (result, _) = tokio::join!(signal.sleep(Duration::from_secs(3600)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            handle.cancel();
        });
        assert!(matches!(result, Err(ProvisionError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_signal_sleeps_normally() {
        let signal = CancelSignal::never();
        assert!(signal.sleep(Duration::from_secs(30)).await.is_ok());
        assert!(!signal.is_cancelled());
    }
}
