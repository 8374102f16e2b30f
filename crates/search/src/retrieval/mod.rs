//! Hybrid retrieval over two index collaborators
//!
//! Provides:
//! - Collaborator traits for the lexical (BM25) and vector indexes
//! - Weighted-sum fusion with near-duplicate removal
//! - Concurrent sub-queries with per-sub-query timeout and cancellation
//! - Tier fallback routing (exact -> metadata -> content)
//! - PostgreSQL adapters for both indexes

mod bm25;
mod fusion;
mod hybrid;
mod tiered;
mod vector;

pub use bm25::PgLexicalIndex;
pub use fusion::{FusionWeights, WeightedFusion};
pub use hybrid::{FusionOutcome, FusionSearcher, SubQueryStatus};
pub use tiered::{TierAttempt, TieredOutcome, TieredRetriever};
pub use vector::PgVectorIndex;

use async_trait::async_trait;
use citeforge_common::errors::Result;
use citeforge_common::models::{IndexHit, RetrievalTier, SearchFilters};
use serde::{Deserialize, Serialize};

/// Lexical (BM25-style) index collaborator.
///
/// Scores must already be normalised into `[0, 1]`.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    async fn search(&self, query: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<IndexHit>>;

    /// Label used in logs and metrics
    fn name(&self) -> &str {
        "bm25"
    }
}

/// Vector similarity index collaborator.
///
/// Implementations embed the query themselves; scores are cosine
/// similarities in `[0, 1]`.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, query: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<IndexHit>>;

    /// Label used in logs and metrics
    fn name(&self) -> &str {
        "vector"
    }
}

/// One fused search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionRequest {
    pub query: String,
    /// Tier whose fusion weights apply
    pub tier: RetrievalTier,
    pub limit: usize,
    #[serde(default)]
    pub filters: SearchFilters,
}

impl FusionRequest {
    pub fn new(query: impl Into<String>, tier: RetrievalTier, limit: usize) -> Self {
        Self {
            query: query.into(),
            tier,
            limit,
            filters: SearchFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// Append SQL predicates for `filters` starting at placeholder `$next`.
///
/// Undated documents pass date filters, matching [`SearchFilters::matches`].
pub(crate) fn filter_clause(
    filters: &SearchFilters,
    values: &mut Vec<sea_orm::Value>,
) -> String {
    let mut clause = String::new();

    if !filters.doc_types.is_empty() {
        let placeholders: Vec<String> = filters
            .doc_types
            .iter()
            .map(|doc_type| {
                values.push(doc_type.as_str().into());
                format!("${}", values.len())
            })
            .collect();
        clause.push_str(&format!(" AND d.doc_type IN ({})", placeholders.join(", ")));
    }

    if let Some(range) = filters.date_range {
        if let Some(from) = range.from {
            values.push(from.into());
            clause.push_str(&format!(
                " AND (d.date_published IS NULL OR d.date_published >= ${})",
                values.len()
            ));
        }
        if let Some(to) = range.to {
            values.push(to.into());
            clause.push_str(&format!(
                " AND (d.date_published IS NULL OR d.date_published <= ${})",
                values.len()
            ));
        }
    }

    clause
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use citeforge_common::models::{DateRange, DocType};

    #[test]
    fn test_filter_clause_numbers_placeholders() {
        let filters = SearchFilters {
            doc_types: vec![DocType::Patent, DocType::Paper],
            date_range: Some(DateRange {
                from: NaiveDate::from_ymd_opt(2020, 1, 1),
                to: None,
            }),
        };
        let mut values: Vec<sea_orm::Value> = vec!["query".into()];
        let clause = filter_clause(&filters, &mut values);

        assert_eq!(values.len(), 4);
        assert!(clause.contains("d.doc_type IN ($2, $3)"));
        assert!(clause.contains("d.date_published >= $4"));
    }

    #[test]
    fn test_empty_filters_add_nothing() {
        let mut values = Vec::new();
        assert!(filter_clause(&SearchFilters::default(), &mut values).is_empty());
        assert!(values.is_empty());
    }
}
