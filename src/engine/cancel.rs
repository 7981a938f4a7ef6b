//! Cooperative cancellation

use std::sync::Arc;
use tokio::sync::watch;

/// A clonable cancellation token.
///
/// Clones observe the same flag. Cancelling is idempotent.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that has not been cancelled
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Requests cancellation
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns true once [`CancelToken::cancel`] was called on any clone
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes when the token is cancelled
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // Errors only once every sender is gone.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }

    /// A token cancelled by Ctrl-C
    #[must_use]
    pub fn on_ctrl_c() -> Self {
        let token = Self::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling");
                trigger.cancel();
            }
        });
        token
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
