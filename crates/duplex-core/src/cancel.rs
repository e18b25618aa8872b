//! Exchange cancellation.
//!
//! A [`CancelSignal`] fires on an explicit [`CancelHandle::cancel`] or when
//! its deadline passes. Every blocking channel operation and every
//! transport call selects on it, so a cancelled exchange never leaves a
//! task parked on `read`, `write` or `issue`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Triggers cancellation for every clone of the paired [`CancelSignal`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Cancel the exchange. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes cancellation of one exchange.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Create a linked handle/signal pair, optionally with a deadline
/// measured from now.
pub fn pair(deadline: Option<Duration>) -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    let handle = CancelHandle { tx: Arc::new(tx) };
    let signal = CancelSignal {
        rx: Some(rx),
        deadline: deadline.map(|d| Instant::now() + d),
    };
    (handle, signal)
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self {
            rx: None,
            deadline: None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        let flagged = self.rx.as_ref().is_some_and(|rx| *rx.borrow());
        let expired = self.deadline.is_some_and(|d| Instant::now() >= d);
        flagged || expired
    }

    /// Completes once the signal has fired.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let flagged = async move {
            let Some(rx) = rx.as_mut() else {
                return std::future::pending::<()>().await;
            };
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                // A dropped handle can no longer cancel.
                if rx.changed().await.is_err() {
                    return std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = flagged => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => flagged.await,
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_waiter() {
        let (handle, signal) = pair(None);
        assert!(!signal.is_cancelled());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.cancelled().await }
        });

        handle.cancel();
        waiter.await.unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (handle, signal) = pair(None);
        handle.cancel();
        handle.cancel();
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_without_handle() {
        let (_handle, signal) = pair(Some(Duration::from_millis(50)));
        assert!(!signal.is_cancelled());
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn never_does_not_fire() {
        let signal = CancelSignal::never();
        let fired = tokio::time::timeout(Duration::from_secs(5), signal.cancelled()).await;
        assert!(fired.is_err());
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_never_fires() {
        let (handle, signal) = pair(None);
        drop(handle);
        let fired = tokio::time::timeout(Duration::from_secs(5), signal.cancelled()).await;
        assert!(fired.is_err());
    }
}
