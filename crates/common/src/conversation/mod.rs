//! Conversation store collaborator
//!
//! Holds message history and the carry-over state of each conversation.
//! States are persisted as JSON and re-read leniently: a corrupt entry
//! costs that entry, never the request.

mod memory;
mod redis;

pub use self::memory::InMemoryConversationStore;
pub use self::redis::RedisConversationStore;

use crate::errors::Result;
use crate::models::{ConversationMessage, ConversationState, MessageRole};
use async_trait::async_trait;

/// Read/append message history and read/write carry-over state
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load the carry-over state, `None` for an unknown conversation
    async fn load_state(&self, conversation_id: &str) -> Result<Option<ConversationState>>;

    /// Replace the carry-over state
    async fn save_state(&self, state: &ConversationState) -> Result<()>;

    /// Append one message to the history
    async fn append_message(&self, conversation_id: &str, message: ConversationMessage) -> Result<()>;

    /// Persist a completed turn: the next carry-over state together with
    /// the user message that produced it. Both are written or neither is.
    async fn commit_turn(&self, state: &ConversationState, message: ConversationMessage) -> Result<()>;

    /// Newest `limit` messages, oldest first
    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<ConversationMessage>>;

    /// Newest `limit` user queries, oldest first
    async fn recent_user_queries(&self, conversation_id: &str, limit: usize) -> Result<Vec<String>> {
        // Assistant replies interleave with user turns, so read twice as many.
        let messages = self
            .recent_messages(conversation_id, limit.saturating_mul(2))
            .await?;
        let mut queries: Vec<String> = messages
            .into_iter()
            .filter(|m| m.role == MessageRole::User)
            .map(|m| m.content)
            .collect();
        if queries.len() > limit {
            queries.drain(..queries.len() - limit);
        }
        Ok(queries)
    }

    /// Backend name for logs and health output
    fn backend(&self) -> &'static str;
}
