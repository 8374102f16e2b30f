//! Tier fallback routing
//!
//! Starting at the classified tier, each tier is tried in turn
//! (exact-lookup -> metadata-semantic -> content-search) until one yields
//! a usable hit. Every attempt is reported.

use super::hybrid::{FusionSearcher, SubQueryStatus};
use super::FusionRequest;
use citeforge_common::cancel::CancellationToken;
use citeforge_common::errors::Result;
use citeforge_common::metrics;
use citeforge_common::models::{RetrievalTier, SearchFilters, SearchHit, TierClassification};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One tier tried during fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierAttempt {
    pub tier: RetrievalTier,
    /// Text actually sent to the indexes
    pub query: String,
    pub hits: usize,
    pub usable: bool,
    pub vector: SubQueryStatus,
    pub lexical: SubQueryStatus,
}

/// Hits of the tier that answered plus the full attempt log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieredOutcome {
    pub hits: Vec<SearchHit>,
    pub tier_used: RetrievalTier,
    pub attempts: Vec<TierAttempt>,
}

impl TieredOutcome {
    /// Attempts that came back without a usable hit
    pub fn fallbacks(&self) -> usize {
        self.attempts.iter().filter(|a| !a.usable).count()
    }

    /// Sub-queries that failed or timed out across all attempts
    pub fn degraded_sub_queries(&self) -> impl Iterator<Item = &SubQueryStatus> {
        self.attempts
            .iter()
            .flat_map(|a| [&a.vector, &a.lexical])
            .filter(|s| matches!(s, SubQueryStatus::Failed { .. } | SubQueryStatus::TimedOut))
    }
}

#[derive(Debug, Clone)]
pub struct TieredRetriever {
    searcher: FusionSearcher,
    min_usable_score: f32,
}

impl TieredRetriever {
    pub fn new(searcher: FusionSearcher) -> Self {
        let min_usable_score = searcher.config().min_usable_score;
        Self {
            searcher,
            min_usable_score,
        }
    }

    pub fn searcher(&self) -> &FusionSearcher {
        &self.searcher
    }

    /// Retrieve with fallback across tiers.
    ///
    /// When no tier yields a usable hit the content-search result is
    /// returned as is (possibly empty).
    pub async fn retrieve(
        &self,
        query: &str,
        classification: &TierClassification,
        limit: usize,
        filters: &SearchFilters,
        cancel: &CancellationToken,
    ) -> Result<TieredOutcome> {
        let chain = classification.tier.fallback_chain();
        let mut attempts = Vec::with_capacity(chain.len());
        let mut last_hits = Vec::new();
        let mut tier_used = classification.tier;

        for (position, &tier) in chain.iter().enumerate() {
            let request = self.request_for(tier, query, classification, limit, filters);
            let outcome = self.searcher.search(&request, cancel).await?;
            let usable = outcome
                .hits
                .iter()
                .any(|h| h.score >= self.min_usable_score);

            attempts.push(TierAttempt {
                tier,
                query: request.query.clone(),
                hits: outcome.hits.len(),
                usable,
                vector: outcome.vector,
                lexical: outcome.lexical,
            });
            tier_used = tier;
            last_hits = outcome.hits;

            if usable {
                break;
            }
            if position + 1 < chain.len() {
                metrics::record_tier_fallback(tier.as_str());
                debug!(
                    tier = tier.as_str(),
                    query = %request.query,
                    "No usable hits, falling back to next tier"
                );
            }
        }

        info!(
            classified = classification.tier.as_str(),
            tier_used = tier_used.as_str(),
            attempts = attempts.len(),
            hits = last_hits.len(),
            "Tiered retrieval complete"
        );

        Ok(TieredOutcome {
            hits: last_hits,
            tier_used,
            attempts,
        })
    }

    fn request_for(
        &self,
        tier: RetrievalTier,
        query: &str,
        classification: &TierClassification,
        limit: usize,
        filters: &SearchFilters,
    ) -> FusionRequest {
        if tier != RetrievalTier::ExactLookup {
            return FusionRequest::new(query, tier, limit).with_filters(filters.clone());
        }

        let identifier = classification
            .signal_kind
            .filter(|kind| kind.is_identifier())
            .and(classification.matched_signal.as_deref());
        let filters = match classification.date_range {
            Some(range) => filters.with_date_range(range),
            None => filters.clone(),
        };

        FusionRequest::new(identifier.unwrap_or(query), tier, limit).with_filters(filters)
    }
}
