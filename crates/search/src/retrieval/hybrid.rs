//! Hybrid retrieval combining vector and lexical search
//!
//! Both sub-queries run concurrently, each under the search policy
//! (rate limit + retry) and its own timeout. A failed or timed-out
//! sub-query degrades to the other one; losing both yields an empty
//! result, not an error.

use super::fusion::{FusionWeights, WeightedFusion};
use super::{FusionRequest, LexicalIndex, VectorIndex};
use citeforge_common::cancel::CancellationToken;
use citeforge_common::config::RetrievalConfig;
use citeforge_common::errors::{AppError, Result};
use citeforge_common::metrics;
use citeforge_common::models::{IndexHit, SearchHit};
use citeforge_common::resilience::SearchPolicy;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of one index sub-query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubQueryStatus {
    Ok { hits: usize },
    Failed { message: String },
    TimedOut,
    /// Not issued (empty query or zero limit)
    Skipped,
}

impl SubQueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubQueryStatus::Ok { .. } => "ok",
            SubQueryStatus::Failed { .. } => "failed",
            SubQueryStatus::TimedOut => "timed_out",
            SubQueryStatus::Skipped => "skipped",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, SubQueryStatus::Ok { .. })
    }
}

/// Fused hits plus per-index diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionOutcome {
    pub hits: Vec<SearchHit>,
    pub vector: SubQueryStatus,
    pub lexical: SubQueryStatus,
    pub latency_ms: u64,
}

impl FusionOutcome {
    fn skipped() -> Self {
        Self {
            hits: Vec::new(),
            vector: SubQueryStatus::Skipped,
            lexical: SubQueryStatus::Skipped,
            latency_ms: 0,
        }
    }
}

/// Hybrid searcher over one lexical and one vector index
#[derive(Clone)]
pub struct FusionSearcher {
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    fusion: WeightedFusion,
    config: RetrievalConfig,
    policy: SearchPolicy,
}

impl FusionSearcher {
    pub fn new(
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            lexical,
            vector,
            fusion: WeightedFusion::from_config(&config),
            policy: SearchPolicy::from_config(&config),
            config,
        }
    }

    /// Replace the rate-limit/retry policy
    pub fn with_policy(mut self, policy: SearchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Run both sub-queries and fuse them.
    ///
    /// Returns `AppError::Cancelled` if `cancel` fires first; in-flight
    /// sub-queries are dropped.
    pub async fn search(
        &self,
        request: &FusionRequest,
        cancel: &CancellationToken,
    ) -> Result<FusionOutcome> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let query = request.query.trim();
        if query.is_empty() || request.limit == 0 {
            return Ok(FusionOutcome::skipped());
        }

        let start = Instant::now();
        let candidate_limit = self.fusion.candidate_limit(request.limit);
        let filters = &request.filters;

        let vector_fut = self.sub_query(self.vector.name(), || {
            self.vector.search(query, filters, candidate_limit)
        });
        let lexical_fut = self.sub_query(self.lexical.name(), || {
            self.lexical.search(query, filters, candidate_limit)
        });

        let ((vector_hits, vector), (lexical_hits, lexical)) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(query, "Fusion search cancelled");
                return Err(AppError::Cancelled);
            }
            pair = async { tokio::join!(vector_fut, lexical_fut) } => pair,
        };

        let weights = FusionWeights::for_tier(&self.config, request.tier);
        let hits = self
            .fusion
            .fuse(weights, vector_hits, lexical_hits, filters, request.limit);
        let latency_ms = start.elapsed().as_millis() as u64;

        debug!(
            query,
            tier = request.tier.as_str(),
            vector = vector.as_str(),
            lexical = lexical.as_str(),
            hits = hits.len(),
            latency_ms,
            "Fusion search complete"
        );

        Ok(FusionOutcome {
            hits,
            vector,
            lexical,
            latency_ms,
        })
    }

    async fn sub_query<F, Fut>(&self, index: &str, op: F) -> (Vec<IndexHit>, SubQueryStatus)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Vec<IndexHit>>>,
    {
        let timeout = self.config.sub_query_timeout();
        let status = match tokio::time::timeout(timeout, self.policy.execute(index, op)).await {
            Ok(Ok(hits)) => {
                let count = hits.len();
                metrics::record_sub_query(index, "ok");
                return (hits, SubQueryStatus::Ok { hits: count });
            }
            Ok(Err(e)) => {
                warn!(index, error = %e, "Sub-query failed, continuing without it");
                SubQueryStatus::Failed {
                    message: e.to_string(),
                }
            }
            Err(_) => {
                warn!(
                    index,
                    timeout_ms = duration_ms(timeout),
                    "Sub-query timed out, continuing without it"
                );
                SubQueryStatus::TimedOut
            }
        };
        metrics::record_sub_query(index, status.as_str());
        (Vec::new(), status)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

impl std::fmt::Debug for FusionSearcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusionSearcher")
            .field("lexical", &self.lexical.name())
            .field("vector", &self.vector.name())
            .field("fusion", &self.fusion)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_tagged() {
        let value = serde_json::to_value(SubQueryStatus::Ok { hits: 3 }).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["hits"], 3);
        assert_eq!(SubQueryStatus::TimedOut.as_str(), "timed_out");
    }
}
