// Copyright (c) 2023 Espresso Systems (espressosys.com)
// This file is part of the sequencer-example-l2 repository.

// You should have received a copy of the MIT License
// along with the sequencer-example-l2 repository. If not, see <https://mit-license.org/>.

use async_std::channel::{bounded, Receiver, Sender};
use std::time::Duration;

/// A cloneable cancellation signal.
///
/// Every clone observes the same signal; once [`CancelToken::cancel`] is called all pending and
/// future waits on any clone complete immediately.
#[derive(Clone, Debug)]
pub struct CancelToken {
    // Nothing is ever sent; closing the channel is the signal.
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    pub fn cancel(&self) {
        self.tx.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.is_closed()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        // `recv` only errors once the channel is closed and drained.
        while self.rx.recv().await.is_ok() {}
    }

    /// Sleeps for `duration`, waking early on cancellation.
    ///
    /// Returns `false` if the token was cancelled before the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        async_std::future::timeout(duration, self.cancelled())
            .await
            .is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[async_std::test]
    async fn sleep_runs_to_completion_without_cancel() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(10)).await);
        assert!(!token.is_cancelled());
    }

    #[async_std::test]
    async fn cancel_wakes_every_clone() {
        let token = CancelToken::new();
        let other = token.clone();
        let started = Instant::now();
        let sleeper = async_std::task::spawn(async move { other.sleep(Duration::from_secs(60)).await });
        async_std::task::sleep(Duration::from_millis(20)).await;
        token.cancel();
        assert!(!sleeper.await);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(token.is_cancelled());
    }
}
