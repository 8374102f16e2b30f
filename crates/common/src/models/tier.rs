//! Retrieval tiers chosen per query

use super::hit::DateRange;
use serde::{Deserialize, Serialize};

/// Retrieval strategy, ordered from cheapest/most precise to broadest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalTier {
    ExactLookup,
    MetadataSemantic,
    ContentSearch,
}

impl RetrievalTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalTier::ExactLookup => "exact-lookup",
            RetrievalTier::MetadataSemantic => "metadata-semantic",
            RetrievalTier::ContentSearch => "content-search",
        }
    }

    /// Tiers to try, in order, when this tier is the classified one.
    /// Content search is always the last resort.
    pub fn fallback_chain(&self) -> &'static [RetrievalTier] {
        match self {
            RetrievalTier::ExactLookup => &[
                RetrievalTier::ExactLookup,
                RetrievalTier::MetadataSemantic,
                RetrievalTier::ContentSearch,
            ],
            RetrievalTier::MetadataSemantic => {
                &[RetrievalTier::MetadataSemantic, RetrievalTier::ContentSearch]
            }
            RetrievalTier::ContentSearch => &[RetrievalTier::ContentSearch],
        }
    }
}

impl std::fmt::Display for RetrievalTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of signal that drove a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    PatentNumber,
    Doi,
    ArxivId,
    DateFilter,
    Attribution,
    Explanatory,
}

impl SignalKind {
    /// Signals naming a single document by identifier
    pub fn is_identifier(&self) -> bool {
        matches!(
            self,
            SignalKind::PatentNumber | SignalKind::Doi | SignalKind::ArxivId
        )
    }
}

/// Result of classifying one query. Stateless and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierClassification {
    pub tier: RetrievalTier,

    /// Confidence in `[0, 1]`
    pub confidence: f32,

    /// Text of the query that matched, if any
    pub matched_signal: Option<String>,

    pub signal_kind: Option<SignalKind>,

    /// Publication window parsed from an explicit date filter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,

    pub explanation: String,
}

impl TierClassification {
    /// Metadata queries are answered from structured fields
    pub fn is_metadata_query(&self) -> bool {
        self.tier == RetrievalTier::MetadataSemantic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_chain_ends_with_content_search() {
        for tier in [
            RetrievalTier::ExactLookup,
            RetrievalTier::MetadataSemantic,
            RetrievalTier::ContentSearch,
        ] {
            let chain = tier.fallback_chain();
            assert_eq!(chain[0], tier);
            assert_eq!(*chain.last().unwrap(), RetrievalTier::ContentSearch);
        }
    }

    #[test]
    fn test_tier_serializes_kebab_case() {
        let json = serde_json::to_string(&RetrievalTier::MetadataSemantic).unwrap();
        assert_eq!(json, "\"metadata-semantic\"");
    }
}
