//! Per-conversation turn serialization

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Idle lock entries are dropped once the map grows past this size
const PRUNE_THRESHOLD: usize = 1024;

/// One async mutex per conversation id.
///
/// A turn holds its conversation's guard from state load to commit, so
/// concurrent turns of one conversation run one after the other while
/// different conversations proceed in parallel.
#[derive(Debug, Default)]
pub struct ConversationLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `conversation_id`
    pub async fn acquire(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() >= PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks
                .entry(conversation_id.to_string())
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of tracked conversations
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
