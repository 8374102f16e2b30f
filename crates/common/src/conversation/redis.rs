use super::ConversationStore;
use crate::cache::{keys, Cache};
use crate::errors::Result;
use crate::models::{ConversationMessage, ConversationState};
use async_trait::async_trait;
use std::sync::Arc;

const MAX_MESSAGES: usize = 200;

/// Redis-backed store: JSON state blob plus a capped message list per
/// conversation, both expiring after `ttl_secs` of inactivity
pub struct RedisConversationStore {
    cache: Arc<Cache>,
    ttl_secs: u64,
}

impl RedisConversationStore {
    pub fn new(cache: Arc<Cache>, ttl_secs: u64) -> Self {
        Self { cache, ttl_secs }
    }

    pub async fn ping(&self) -> Result<()> {
        self.cache.ping().await
    }
}

#[async_trait]
impl ConversationStore for RedisConversationStore {
    async fn load_state(&self, conversation_id: &str) -> Result<Option<ConversationState>> {
        let value = self
            .cache
            .get_json(&keys::conversation_state(conversation_id))
            .await?;
        Ok(value.map(|v| ConversationState::from_value_lenient(conversation_id, v)))
    }

    async fn save_state(&self, state: &ConversationState) -> Result<()> {
        self.cache
            .set_with_ttl(
                &keys::conversation_state(&state.conversation_id),
                state,
                self.ttl_secs,
            )
            .await
    }

    async fn append_message(&self, conversation_id: &str, message: ConversationMessage) -> Result<()> {
        self.cache
            .push_capped(
                &keys::conversation_messages(conversation_id),
                &message,
                MAX_MESSAGES,
                self.ttl_secs,
            )
            .await
    }

    async fn commit_turn(&self, state: &ConversationState, message: ConversationMessage) -> Result<()> {
        self.cache
            .set_and_push_capped(
                &keys::conversation_state(&state.conversation_id),
                state,
                &keys::conversation_messages(&state.conversation_id),
                &message,
                MAX_MESSAGES,
                self.ttl_secs,
            )
            .await
    }

    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<ConversationMessage>> {
        self.cache
            .list_tail(&keys::conversation_messages(conversation_id), limit)
            .await
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
