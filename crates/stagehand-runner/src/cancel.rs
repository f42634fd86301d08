//! Deadlines and cancellation for runtime calls.

use stagehand_core::{Error, Result};
use std::future::Future;
use tokio::sync::watch;
use tokio::time::{Duration, timeout};

/// Cancellation signal shared by every runtime call of a run.
///
/// Backed by a `watch` channel; sending `true` cancels all in-flight guards.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// Create a signal and the sender that triggers it.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without cancelling: nothing can fire anymore.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run `fut` under an optional deadline, racing the cancellation signal.
    pub async fn guard<T, F>(&self, operation: &str, limit: Option<Duration>, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let bounded = async {
            match limit {
                Some(after) => timeout(after, fut).await.map_err(|_| Error::Timeout {
                    operation: operation.to_string(),
                    after,
                })?,
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Error::Cancelled),
            result = bounded => result,
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::never()
    }
}
