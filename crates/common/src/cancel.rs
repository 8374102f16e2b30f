//! Cooperative, awaitable cancellation token.

use std::sync::Arc;
use tokio::sync::watch;

/// Cancellation signal shared by every stage of one request.
///
/// Clones observe the same state. Pending sub-queries race against
/// [`CancellationToken::cancelled`] and are dropped once it resolves.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    /// Create a new cancellation token (not cancelled).
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
