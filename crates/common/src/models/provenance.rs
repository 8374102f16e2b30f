//! Blended hits, gate decisions and provenance scores

use super::hit::SearchHit;
use serde::{Deserialize, Serialize};

/// Notice shown to the end user when retrieved evidence is not trusted
pub const NO_RELIABLE_SOURCE_NOTICE: &str =
    "No reliable source was found in your documents for this question.";

/// A search hit after blending with carried-over sources.
/// At most one per document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridHit {
    #[serde(flatten)]
    pub hit: SearchHit,

    pub reranked_score: f32,

    /// Placeholder for a source that only exists through carry-over
    pub is_carried_over: bool,

    /// Fresh hit whose document was also carried over
    pub has_carried_context: bool,

    /// Other fresh chunks of the same document, best first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supporting_chunks: Vec<SearchHit>,
}

impl HybridHit {
    pub fn document_id(&self) -> &str {
        &self.hit.document_id
    }
}

/// Aggregate relevance of assembled evidence
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RelevanceMetrics {
    pub average_relevance: f32,
    pub relevant_citation_count: usize,
    pub total_citations: usize,
}

/// Outcome of the pre-generation relevance gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GateDecision {
    /// Evidence may be presented
    Pass {
        metrics: RelevanceMetrics,
        /// Thresholds were skipped for a metadata query
        exempt: bool,
    },
    /// Nothing was retrieved
    NoEvidence,
    /// Evidence was retrieved but is too weak to present
    InsufficientEvidence {
        metrics: RelevanceMetrics,
        reason: String,
    },
}

impl GateDecision {
    pub fn is_pass(&self) -> bool {
        matches!(self, GateDecision::Pass { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            GateDecision::Pass { .. } => "pass",
            GateDecision::NoEvidence => "no_evidence",
            GateDecision::InsufficientEvidence { .. } => "insufficient_evidence",
        }
    }

    /// Message for the end user when evidence is withheld
    pub fn user_notice(&self) -> Option<&'static str> {
        match self {
            GateDecision::Pass { .. } => None,
            _ => Some(NO_RELIABLE_SOURCE_NOTICE),
        }
    }
}

/// Components of the provenance score, each in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvenanceBreakdown {
    pub citation_presence: f32,
    pub factual_density: f32,
    pub token_overlap: f32,
    pub search_quality: f32,
}

/// How much of a generated answer is grounded in retrieved evidence
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvenanceScore {
    /// Weighted composite rounded to two decimals
    pub value: f32,
    pub breakdown: ProvenanceBreakdown,
}
