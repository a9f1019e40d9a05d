// mimir-core/src/ports/cancellation.rs
//
// Cooperative cancellation token carried into every plugin `execute` call
// and observed by the dispatcher between steps (§5). Built over
// `tokio::sync::watch` rather than a bespoke atomic flag so a waiter can
// `.changed().await` instead of polling.

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

#[derive(Debug, Clone)]
pub struct CancellationSource {
    tx: watch::Sender<bool>,
}

impl CancellationSource {
    pub fn new() -> (Self, CancellationToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancellationToken { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Mints another token observing this source, independent of the one
    /// returned by `new()`.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new().0
    }
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel()` has been called on the paired source.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_propagates_to_token() {
        let (source, token) = CancellationSource::new();
        assert!(!token.is_cancelled());
        source.cancel();
        token.cancelled().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cloned_tokens_observe_same_source() {
        let (source, token) = CancellationSource::new();
        let other = token.clone();
        source.cancel();
        other.cancelled().await;
        assert!(token.is_cancelled());
    }
}
