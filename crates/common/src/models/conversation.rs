//! Conversation-scoped retrieval state

use super::hit::DocType;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A document that contributed evidence earlier in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSource {
    pub document_id: String,

    /// Carry score in `[0, 1]`
    pub carry_score: f32,

    /// Consecutive turns without a fresh hit for this document
    pub turns_inactive: u32,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub doc_type: DocType,

    #[serde(default)]
    pub date_published: Option<NaiveDate>,
}

impl ConversationSource {
    /// Structural sanity of a persisted entry
    pub fn is_well_formed(&self) -> bool {
        !self.document_id.trim().is_empty()
            && self.carry_score.is_finite()
            && (0.0..=1.0).contains(&self.carry_score)
    }
}

/// How the current turn relates to earlier turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TurnType {
    NewTopic,
    DrillDown,
    SameSources,
    Compare,
}

impl TurnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnType::NewTopic => "new-topic",
            TurnType::DrillDown => "drill-down",
            TurnType::SameSources => "same-sources",
            TurnType::Compare => "compare",
        }
    }
}

/// Answer style suggested to the generation collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseMode {
    Fact,
    Explain,
    Conflicts,
}

/// Per-turn analysis, computed fresh each turn and never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnAnalysis {
    pub turn_type: TurnType,
    pub response_mode: ResponseMode,
    pub confidence: f32,
    pub reasoning: String,
}

/// Persisted carry-over state of one conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: String,

    /// Number of completed turns
    #[serde(default)]
    pub turn: u32,

    #[serde(default)]
    pub sources: Vec<ConversationSource>,

    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            turn: 0,
            sources: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn source(&self, document_id: &str) -> Option<&ConversationSource> {
        self.sources.iter().find(|s| s.document_id == document_id)
    }

    /// Rebuild state from an untrusted JSON blob.
    ///
    /// Malformed source entries are dropped one by one; a blob that is not
    /// an object at all yields an empty state for the conversation.
    pub fn from_value_lenient(conversation_id: &str, value: serde_json::Value) -> Self {
        let mut state = Self::new(conversation_id);

        let serde_json::Value::Object(mut map) = value else {
            warn!(conversation_id, "Discarding unreadable conversation state");
            return state;
        };

        state.turn = map
            .get("turn")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0);

        if let Some(updated_at) = map
            .get("updated_at")
            .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok())
        {
            state.updated_at = updated_at;
        }

        if let Some(serde_json::Value::Array(entries)) = map.remove("sources") {
            for entry in entries {
                match serde_json::from_value::<ConversationSource>(entry) {
                    Ok(source) => state.sources.push(source),
                    Err(e) => warn!(
                        conversation_id,
                        error = %e,
                        "Discarding malformed carry-over entry"
                    ),
                }
            }
        }

        state.sanitize();
        state
    }

    /// Drop entries that are structurally invalid or duplicated.
    /// Returns the number of discarded entries.
    pub fn sanitize(&mut self) -> usize {
        let before = self.sources.len();
        let mut seen = std::collections::HashSet::new();
        let conversation_id = self.conversation_id.clone();

        self.sources.retain(|source| {
            if !source.is_well_formed() {
                warn!(
                    conversation_id = %conversation_id,
                    document_id = %source.document_id,
                    carry_score = source.carry_score,
                    "Discarding corrupt carry-over entry"
                );
                return false;
            }
            seen.insert(source.document_id.clone())
        });

        before - self.sources.len()
    }
}

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One message of the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lenient_parse_drops_bad_entries() {
        let value = json!({
            "conversation_id": "c-1",
            "turn": 4,
            "sources": [
                { "document_id": "doc-a", "carry_score": 0.6, "turns_inactive": 1 },
                { "document_id": "doc-b", "carry_score": "high", "turns_inactive": 0 },
                { "document_id": "", "carry_score": 0.4, "turns_inactive": 0 },
                { "document_id": "doc-c", "carry_score": 3.0, "turns_inactive": 0 },
                { "document_id": "doc-a", "carry_score": 0.2, "turns_inactive": 2 }
            ],
            "updated_at": "2024-05-01T10:00:00Z"
        });

        let state = ConversationState::from_value_lenient("c-1", value);

        assert_eq!(state.turn, 4);
        assert_eq!(state.sources.len(), 1);
        assert_eq!(state.sources[0].document_id, "doc-a");
        assert_eq!(state.sources[0].carry_score, 0.6);
    }

    #[test]
    fn test_lenient_parse_non_object() {
        let state = ConversationState::from_value_lenient("c-2", json!("garbage"));
        assert_eq!(state.conversation_id, "c-2");
        assert!(state.sources.is_empty());
    }

    #[test]
    fn test_sanitize_reports_discarded() {
        let mut state = ConversationState::new("c-3");
        state.sources.push(ConversationSource {
            document_id: "doc".into(),
            carry_score: f32::NAN,
            turns_inactive: 0,
            title: String::new(),
            doc_type: DocType::Other,
            date_published: None,
        });
        assert_eq!(state.sanitize(), 1);
        assert!(state.sources.is_empty());
    }
}
