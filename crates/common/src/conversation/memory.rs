use super::ConversationStore;
use crate::errors::Result;
use crate::models::{ConversationMessage, ConversationState};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Matches the default `carry_over.state_ttl_secs`
const DEFAULT_TTL_SECS: u64 = 86_400;

struct Entry {
    state: Option<serde_json::Value>,
    messages: Vec<ConversationMessage>,
    last_active: DateTime<Utc>,
}

impl Entry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: None,
            messages: Vec::new(),
            last_active: now,
        }
    }
}

/// Process-local store, used when no Redis URL is configured and in tests.
///
/// Like the Redis store, a conversation expires after `ttl` without
/// writes. Expired entries read as absent and are dropped on the next
/// write, so the map stays bounded by the conversations active within
/// one TTL.
pub struct InMemoryConversationStore {
    entries: RwLock<HashMap<String, Entry>>,
    max_messages: usize,
    ttl: TimeDelta,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL_SECS)
    }

    pub fn with_ttl(ttl_secs: u64) -> Self {
        let ttl = i64::try_from(ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        Self {
            entries: RwLock::new(HashMap::new()),
            max_messages: 200,
            ttl,
        }
    }

    /// Store an arbitrary JSON blob as a conversation's state
    pub async fn put_raw_state(&self, conversation_id: &str, value: serde_json::Value) {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        self.touch(&mut entries, conversation_id, now).state = Some(value);
    }

    /// Conversations currently held, expired ones included until pruned
    pub async fn conversation_count(&self) -> usize {
        self.entries.read().await.len()
    }

    fn is_expired(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.last_active) > self.ttl
    }

    /// Drop expired conversations, then return the live entry for `conversation_id`
    fn touch<'a>(
        &self,
        entries: &'a mut HashMap<String, Entry>,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> &'a mut Entry {
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        let expired = before - entries.len();
        if expired > 0 {
            debug!(expired, remaining = entries.len(), "Expired idle conversations");
        }

        let entry = entries
            .entry(conversation_id.to_string())
            .or_insert_with(|| Entry::new(now));
        entry.last_active = now;
        entry
    }

    fn push_message(&self, entry: &mut Entry, message: ConversationMessage) {
        entry.messages.push(message);
        let cap = self.max_messages.max(1);
        if entry.messages.len() > cap {
            let excess = entry.messages.len() - cap;
            entry.messages.drain(..excess);
        }
    }

    #[cfg(test)]
    async fn backdate(&self, conversation_id: &str, by: TimeDelta) {
        if let Some(entry) = self.entries.write().await.get_mut(conversation_id) {
            entry.last_active -= by;
        }
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load_state(&self, conversation_id: &str) -> Result<Option<ConversationState>> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(conversation_id)
            .filter(|e| !self.is_expired(e, now))
            .and_then(|e| e.state.clone())
            .map(|value| ConversationState::from_value_lenient(conversation_id, value)))
    }

    async fn save_state(&self, state: &ConversationState) -> Result<()> {
        let value = serde_json::to_value(state)?;
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        self.touch(&mut entries, &state.conversation_id, now).state = Some(value);
        Ok(())
    }

    async fn append_message(&self, conversation_id: &str, message: ConversationMessage) -> Result<()> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let entry = self.touch(&mut entries, conversation_id, now);
        self.push_message(entry, message);
        Ok(())
    }

    async fn commit_turn(&self, state: &ConversationState, message: ConversationMessage) -> Result<()> {
        let value = serde_json::to_value(state)?;
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let entry = self.touch(&mut entries, &state.conversation_id, now);
        entry.state = Some(value);
        self.push_message(entry, message);
        Ok(())
    }

    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<ConversationMessage>> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(conversation_id)
            .filter(|e| !self.is_expired(e, now))
            .map(|e| {
                let start = e.messages.len().saturating_sub(limit);
                e.messages[start..].to_vec()
            })
            .unwrap_or_default())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
