//! Context Carry-Over - Turn classification and cross-turn source tracking
//!
//! Provides:
//! - Classification of a turn against the previous user queries
//! - Turn-dependent weighting of previously retrieved sources
//! - Decay, refresh and eviction of the per-conversation source map
//!
//! Every operation here is pure: the manager returns the next state as a
//! [`CarryOverUpdate`] and the caller decides when to commit it.

use crate::config::CarryOverConfig;
use crate::models::{
    ConversationSource, ConversationState, ResponseMode, SearchHit, TurnAnalysis, TurnType,
};
use crate::text::{compile_pattern, content_words, jaccard, words};
use chrono::Utc;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

/// Queries this short that ask for a fact get a FACT response
const SHORT_QUERY_WORDS: usize = 10;

struct TurnPatterns {
    compare: Regex,
    same_sources: Regex,
    implicit: Regex,
    pronoun: Regex,
    explanatory: Regex,
}

fn turn_patterns() -> &'static TurnPatterns {
    static PATTERNS: OnceLock<TurnPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| TurnPatterns {
        compare: compile_pattern(
            r"(?i)\b(compare|compared|comparing|comparison|versus|vs\.?|differences?\s+between|contrast|how\s+does\s+\w+\s+differ|which\s+is\s+better)\b",
        ),
        same_sources: compile_pattern(
            r"(?i)\b((?:same|these|those|above|previous|earlier)\s+(?:sources?|documents?|papers?|patents?|results?|references?)|from\s+the\s+same|you\s+(?:just\s+)?(?:cited|mentioned))\b",
        ),
        implicit: compile_pattern(
            r"(?i)\b(what\s+about|how\s+about|tell\s+me\s+more|more\s+(?:about|detail|details)|elaborate|expand\s+on|go\s+deeper|follow[-\s]up|and\s+also)\b",
        ),
        pronoun: compile_pattern(
            r"(?i)\b(it|its|they|them|their|theirs|this|these|those|he|she|his|her)\b",
        ),
        explanatory: compile_pattern(r"(?i)\b(how|why|explain|describe|walk\s+me\s+through)\b"),
    })
}

/// Heuristic turn classifier
#[derive(Debug, Clone)]
pub struct TurnClassifier {
    overlap_threshold: f32,
    window: usize,
}

impl TurnClassifier {
    pub fn new(config: &CarryOverConfig) -> Self {
        Self {
            overlap_threshold: config.overlap_threshold,
            window: config.recent_query_window,
        }
    }

    /// Classify `query` against the most recent user queries (oldest first)
    pub fn classify(&self, query: &str, recent_queries: &[String]) -> TurnAnalysis {
        let p = turn_patterns();
        let start = recent_queries.len().saturating_sub(self.window);
        let recent = &recent_queries[start..];

        let (turn_type, confidence, reasoning) = if let Some(m) = p.compare.find(query) {
            (
                TurnType::Compare,
                0.85,
                format!("Comparison language ('{}')", m.as_str()),
            )
        } else if recent.iter().all(|q| q.trim().is_empty()) {
            (TurnType::NewTopic, 0.9, "First turn of the conversation".to_string())
        } else if let Some(m) = p.same_sources.find(query) {
            (
                TurnType::SameSources,
                0.85,
                format!("Refers back to earlier sources ('{}')", m.as_str()),
            )
        } else if let Some(m) = p.implicit.find(query) {
            (
                TurnType::DrillDown,
                0.8,
                format!("Implicit follow-up ('{}')", m.as_str()),
            )
        } else if let Some(m) = p.pronoun.find(query) {
            (
                TurnType::DrillDown,
                0.75,
                format!("Pronoun reference ('{}')", m.as_str()),
            )
        } else {
            let current = content_words(query);
            let overlap = recent
                .iter()
                .map(|q| jaccard(&current, &content_words(q)))
                .fold(0.0f32, f32::max);

            if overlap >= self.overlap_threshold {
                (
                    TurnType::DrillDown,
                    (0.6 + overlap * 0.3).min(0.9),
                    format!("Lexical overlap {:.2} with recent queries", overlap),
                )
            } else {
                (
                    TurnType::NewTopic,
                    0.7,
                    format!("Lexical overlap {:.2} below threshold", overlap),
                )
            }
        };

        let response_mode = response_mode_for(turn_type, query);
        debug!(
            turn_type = turn_type.as_str(),
            response_mode = ?response_mode,
            confidence,
            "Turn classified"
        );

        TurnAnalysis {
            turn_type,
            response_mode,
            confidence,
            reasoning,
        }
    }
}

fn response_mode_for(turn_type: TurnType, query: &str) -> ResponseMode {
    match turn_type {
        TurnType::Compare => ResponseMode::Conflicts,
        TurnType::DrillDown
            if words(query).len() <= SHORT_QUERY_WORDS
                && !turn_patterns().explanatory.is_match(query) =>
        {
            ResponseMode::Fact
        }
        _ => ResponseMode::Explain,
    }
}

/// A previously retrieved source offered to the blender this turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarriedSource {
    #[serde(flatten)]
    pub source: ConversationSource,

    /// `carry_score` times the turn multiplier, unclamped
    pub weight: f32,
}

/// Result of one carry-over step, committed only after blending succeeds
#[derive(Debug, Clone, PartialEq)]
pub struct CarryOverUpdate {
    /// Sources carried into this turn
    pub carried: Vec<CarriedSource>,

    /// State to persist for the next turn
    pub next_state: ConversationState,

    pub refreshed: Vec<String>,
    pub inserted: Vec<String>,
    pub evicted: Vec<String>,
}

/// Tracks which sources stay relevant across turns
#[derive(Debug, Clone)]
pub struct CarryOverManager {
    config: CarryOverConfig,
}

impl CarryOverManager {
    pub fn new(config: CarryOverConfig) -> Self {
        Self { config }
    }

    /// Weight multiplier applied to carried sources for a turn type
    pub fn multiplier(&self, turn_type: TurnType) -> f32 {
        match turn_type {
            TurnType::NewTopic => self.config.new_topic_weight,
            TurnType::DrillDown => self.config.drill_down_boost,
            TurnType::SameSources => self.config.same_sources_boost,
            TurnType::Compare => self.config.compare_boost,
        }
    }

    /// Weight carried sources for this turn and compute the next state.
    ///
    /// Sources with a fresh hit are refreshed with the best fresh score;
    /// the rest decay. Sources idle for longer than the retention window
    /// or decayed under the floor are evicted. Documents never retrieved
    /// in the conversation cannot appear in the output.
    pub fn manage(
        &self,
        state: &ConversationState,
        turn_type: TurnType,
        fresh_hits: &[SearchHit],
    ) -> CarryOverUpdate {
        let multiplier = self.multiplier(turn_type);
        let carried: Vec<CarriedSource> = state
            .sources
            .iter()
            .map(|source| CarriedSource {
                source: source.clone(),
                weight: source.carry_score * multiplier,
            })
            .collect();

        // Best fresh hit per document, in first-seen order
        let mut best: HashMap<&str, &SearchHit> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for hit in fresh_hits {
            match best.get(hit.document_id.as_str()) {
                Some(existing) if existing.score >= hit.score => {}
                Some(_) => {
                    best.insert(&hit.document_id, hit);
                }
                None => {
                    order.push(&hit.document_id);
                    best.insert(&hit.document_id, hit);
                }
            }
        }

        let mut refreshed = Vec::new();
        let mut evicted = Vec::new();
        let mut next_sources = Vec::with_capacity(state.sources.len() + order.len());

        for source in &state.sources {
            let next = match best.get(source.document_id.as_str()) {
                Some(hit) => {
                    refreshed.push(source.document_id.clone());
                    ConversationSource {
                        document_id: source.document_id.clone(),
                        carry_score: hit.score.clamp(0.0, 1.0),
                        turns_inactive: 0,
                        title: hit.title.clone(),
                        doc_type: hit.doc_type,
                        date_published: hit.date_published.or(source.date_published),
                    }
                }
                None => ConversationSource {
                    turns_inactive: source.turns_inactive.saturating_add(1),
                    carry_score: source.carry_score * self.config.decay_factor,
                    ..source.clone()
                },
            };

            if self.should_evict(&next) {
                evicted.push(next.document_id);
            } else {
                next_sources.push(next);
            }
        }

        let mut inserted = Vec::new();
        for document_id in order {
            if state.source(document_id).is_some() {
                continue;
            }
            let hit = best[document_id];
            let source = ConversationSource {
                document_id: document_id.to_string(),
                carry_score: hit.score.clamp(0.0, 1.0),
                turns_inactive: 0,
                title: hit.title.clone(),
                doc_type: hit.doc_type,
                date_published: hit.date_published,
            };
            if !self.should_evict(&source) {
                inserted.push(source.document_id.clone());
                next_sources.push(source);
            }
        }

        next_sources.sort_by(|a, b| {
            b.carry_score
                .total_cmp(&a.carry_score)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });

        debug!(
            conversation_id = %state.conversation_id,
            turn_type = turn_type.as_str(),
            carried = carried.len(),
            refreshed = refreshed.len(),
            inserted = inserted.len(),
            evicted = evicted.len(),
            "Carry-over computed"
        );

        CarryOverUpdate {
            carried,
            next_state: ConversationState {
                conversation_id: state.conversation_id.clone(),
                turn: state.turn.saturating_add(1),
                sources: next_sources,
                updated_at: Utc::now(),
            },
            refreshed,
            inserted,
            evicted,
        }
    }

    fn should_evict(&self, source: &ConversationSource) -> bool {
        source.turns_inactive > self.config.retention_turns
            || source.carry_score < self.config.score_floor
    }
}
