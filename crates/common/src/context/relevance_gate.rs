//! Relevance Gate - Decides whether assembled evidence may be presented

use crate::config::GateConfig;
use crate::models::{
    CitationAssembly, CitationGroup, GateDecision, RelevanceMetrics, TierClassification,
};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RelevanceGate {
    config: GateConfig,
}

impl RelevanceGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Relevance summary over citation groups
    pub fn metrics(&self, groups: &[CitationGroup]) -> RelevanceMetrics {
        if groups.is_empty() {
            return RelevanceMetrics::default();
        }

        let total: f32 = groups.iter().map(|g| g.combined_relevance).sum();
        let relevant = groups
            .iter()
            .filter(|g| meets(g.combined_relevance, self.config.relevant_citation_threshold))
            .count();

        RelevanceMetrics {
            average_relevance: total / groups.len() as f32,
            relevant_citation_count: relevant,
            total_citations: groups.len(),
        }
    }

    /// Judge the assembled evidence for a query classified as `classification`
    pub fn evaluate(
        &self,
        assembly: &CitationAssembly,
        classification: &TierClassification,
    ) -> GateDecision {
        if assembly.groups.is_empty() {
            debug!("Relevance gate: no evidence");
            return GateDecision::NoEvidence;
        }

        let metrics = self.metrics(&assembly.groups);

        if self.config.exempt_metadata_queries && classification.is_metadata_query() {
            return GateDecision::Pass {
                metrics,
                exempt: true,
            };
        }

        let average_ok = meets(metrics.average_relevance, self.config.min_average_relevance);
        let count_ok = metrics.relevant_citation_count >= self.config.min_relevant_citations;

        if average_ok && count_ok {
            return GateDecision::Pass {
                metrics,
                exempt: false,
            };
        }

        let reason = if !average_ok {
            format!(
                "average relevance {:.3} is below {:.3}",
                metrics.average_relevance, self.config.min_average_relevance
            )
        } else {
            format!(
                "{} relevant citations, at least {} required",
                metrics.relevant_citation_count, self.config.min_relevant_citations
            )
        };

        info!(
            average_relevance = metrics.average_relevance,
            relevant = metrics.relevant_citation_count,
            total = metrics.total_citations,
            "Relevance gate rejected evidence: {}",
            reason
        );

        GateDecision::InsufficientEvidence { metrics, reason }
    }
}

/// Inclusive on the pass side, with no tolerance below the threshold
fn meets(value: f32, threshold: f32) -> bool {
    value >= threshold
}
