//! Weighted-sum fusion of vector and lexical results
//!
//! `score = vector_weight * similarity + bm25_weight * bm25`
//!
//! A chunk found by both searches sums both contributions, which rewards
//! corroboration. Near-duplicate chunks (word-set Jaccard at or above the
//! threshold) are collapsed onto the higher-scoring one.

use citeforge_common::config::RetrievalConfig;
use citeforge_common::models::{HitSource, IndexHit, RetrievalTier, SearchFilters, SearchHit};
use citeforge_common::text::{jaccard, word_set};
use std::collections::{HashMap, HashSet};

/// Per-tier fusion weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub vector: f32,
    pub bm25: f32,
}

impl FusionWeights {
    pub fn new(vector: f32, bm25: f32) -> Self {
        Self { vector, bm25 }
    }

    /// Identifier-heavy tiers lean on lexical matching
    pub fn for_tier(config: &RetrievalConfig, tier: RetrievalTier) -> Self {
        match tier {
            RetrievalTier::ContentSearch => Self::new(config.vector_weight, config.bm25_weight),
            RetrievalTier::MetadataSemantic => {
                Self::new(config.metadata_vector_weight, config.metadata_bm25_weight)
            }
            RetrievalTier::ExactLookup => {
                Self::new(config.exact_vector_weight, config.exact_bm25_weight)
            }
        }
    }
}

/// Fusion parameters shared by every tier
#[derive(Debug, Clone)]
pub struct WeightedFusion {
    /// Jaccard similarity at which two chunks are duplicates
    pub dedup_threshold: f32,

    /// Candidates kept ahead of filtering, as a multiple of the limit
    pub candidate_multiplier: usize,
}

impl Default for WeightedFusion {
    fn default() -> Self {
        Self {
            dedup_threshold: 0.8,
            candidate_multiplier: 2,
        }
    }
}

/// Accumulated contributions of one chunk
struct Fused {
    hit: IndexHit,
    vector: Option<f32>,
    bm25: Option<f32>,
}

impl WeightedFusion {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            dedup_threshold: config.dedup_threshold,
            candidate_multiplier: config.candidate_multiplier.max(1),
        }
    }

    /// Number of candidates requested from each index for `limit` results
    pub fn candidate_limit(&self, limit: usize) -> usize {
        limit.saturating_mul(self.candidate_multiplier.max(1))
    }

    /// Fuse two ranked lists into at most `limit` hits.
    ///
    /// Ties keep first-seen order (vector list first), so fusing a list
    /// with itself preserves its order.
    pub fn fuse(
        &self,
        weights: FusionWeights,
        vector: Vec<IndexHit>,
        lexical: Vec<IndexHit>,
        filters: &SearchFilters,
        limit: usize,
    ) -> Vec<SearchHit> {
        let mut fused: Vec<Fused> = Vec::with_capacity(vector.len() + lexical.len());
        let mut index_of: HashMap<String, usize> = HashMap::new();

        for hit in vector {
            let contribution = weights.vector * hit.score.clamp(0.0, 1.0);
            match index_of.get(&hit.chunk_id) {
                Some(&i) => {
                    let entry = &mut fused[i];
                    entry.vector = Some(entry.vector.map_or(contribution, |v| v.max(contribution)));
                }
                None => {
                    index_of.insert(hit.chunk_id.clone(), fused.len());
                    fused.push(Fused {
                        hit,
                        vector: Some(contribution),
                        bm25: None,
                    });
                }
            }
        }

        for hit in lexical {
            let contribution = weights.bm25 * hit.score.clamp(0.0, 1.0);
            match index_of.get(&hit.chunk_id) {
                Some(&i) => {
                    let entry = &mut fused[i];
                    entry.bm25 = Some(entry.bm25.map_or(contribution, |v| v.max(contribution)));
                }
                None => {
                    index_of.insert(hit.chunk_id.clone(), fused.len());
                    fused.push(Fused {
                        hit,
                        vector: None,
                        bm25: Some(contribution),
                    });
                }
            }
        }

        let mut hits: Vec<SearchHit> = fused.into_iter().map(into_search_hit).collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(self.candidate_limit(limit));

        let filtered = hits
            .into_iter()
            .filter(|h| filters.matches(h.doc_type, h.date_published));
        let mut deduped = self.dedup(filtered);
        deduped.truncate(limit);
        deduped
    }

    /// Drop near-duplicates of higher-ranked hits. Input must be sorted
    /// best first.
    fn dedup(&self, hits: impl Iterator<Item = SearchHit>) -> Vec<SearchHit> {
        let mut kept: Vec<(SearchHit, HashSet<String>)> = Vec::new();
        for hit in hits {
            let words = word_set(&hit.content);
            let duplicate = kept
                .iter()
                .any(|(_, other)| jaccard(&words, other) >= self.dedup_threshold);
            if !duplicate {
                kept.push((hit, words));
            }
        }
        kept.into_iter().map(|(hit, _)| hit).collect()
    }
}

fn into_search_hit(fused: Fused) -> SearchHit {
    let Fused { hit, vector, bm25 } = fused;
    let source = match (vector, bm25) {
        (Some(_), Some(_)) => HitSource::Both,
        (None, Some(_)) => HitSource::Bm25,
        _ => HitSource::Vector,
    };
    let score = (vector.unwrap_or(0.0) + bm25.unwrap_or(0.0)).clamp(0.0, 1.0);

    SearchHit {
        document_id: hit.document_id,
        chunk_id: hit.chunk_id,
        chunk_index: hit.chunk_index,
        score,
        vector_score: vector,
        bm25_score: bm25,
        source,
        content: hit.content,
        title: hit.title,
        doc_type: hit.doc_type,
        page_range: hit.page_range,
        section_title: hit.section_title,
        date_published: hit.date_published,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use citeforge_common::models::{DateRange, DocType};

    fn index_hit(chunk: &str, score: f32, content: &str) -> IndexHit {
        IndexHit {
            document_id: format!("doc-{}", chunk),
            chunk_id: chunk.to_string(),
            chunk_index: 0,
            score,
            content: content.to_string(),
            title: format!("Title {}", chunk),
            doc_type: DocType::Paper,
            page_range: None,
            section_title: None,
            date_published: None,
        }
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_fusing_a_list_with_itself_keeps_order() {
        let list = vec![
            index_hit("a", 0.9, "solid state electrolyte"),
            index_hit("b", 0.7, "lithium metal anode"),
            index_hit("c", 0.7, "ceramic separator coating"),
            index_hit("d", 0.2, "cathode binder"),
        ];
        let fusion = WeightedFusion::default();
        let weights = FusionWeights::new(0.7, 0.3);

        let alone = fusion.fuse(weights, list.clone(), Vec::new(), &SearchFilters::default(), 10);
        let doubled = fusion.fuse(weights, list.clone(), list, &SearchFilters::default(), 10);

        assert_eq!(ids(&alone), ids(&doubled));
        assert!(doubled.iter().all(|h| h.source == HitSource::Both));
        assert!((doubled[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_lexical_only_hit_is_weighted() {
        let fusion = WeightedFusion::default();
        let weights = FusionWeights::new(0.3, 0.7);
        let hits = fusion.fuse(
            weights,
            Vec::new(),
            vec![index_hit("us11281020", 0.95, "claims of the patent")],
            &SearchFilters::default(),
            10,
        );

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, HitSource::Bm25);
        assert!((hits[0].score - 0.95 * 0.7).abs() < 1e-6);
        assert_eq!(hits[0].vector_score, None);
    }

    #[test]
    fn test_corroborated_hit_outranks_single_source() {
        let fusion = WeightedFusion::default();
        let weights = FusionWeights::new(0.6, 0.4);
        let hits = fusion.fuse(
            weights,
            vec![index_hit("a", 0.9, "alpha text"), index_hit("b", 0.7, "beta text")],
            vec![index_hit("b", 0.8, "beta text")],
            &SearchFilters::default(),
            10,
        );
        // b: 0.42 + 0.32 = 0.74, a: 0.54
        assert_eq!(ids(&hits), vec!["b", "a"]);
        assert_eq!(hits[0].source, HitSource::Both);
    }

    #[test]
    fn test_near_duplicates_keep_higher_score() {
        let fusion = WeightedFusion::default();
        let hits = fusion.fuse(
            FusionWeights::new(1.0, 0.0),
            vec![
                index_hit("low", 0.5, "the anode is coated with lithium phosphate film"),
                index_hit("high", 0.9, "the anode is coated with lithium phosphate film"),
                index_hit("other", 0.4, "completely different cathode chemistry"),
            ],
            Vec::new(),
            &SearchFilters::default(),
            10,
        );
        assert_eq!(ids(&hits), vec!["high", "other"]);
    }

    #[test]
    fn test_empty_contents_are_not_duplicates() {
        let fusion = WeightedFusion::default();
        let hits = fusion.fuse(
            FusionWeights::new(1.0, 0.0),
            vec![index_hit("a", 0.9, ""), index_hit("b", 0.8, "")],
            Vec::new(),
            &SearchFilters::default(),
            10,
        );
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_filters_and_limit() {
        let fusion = WeightedFusion::default();
        let mut old = index_hit("old", 0.9, "old text");
        old.date_published = NaiveDate::from_ymd_opt(2010, 1, 1);
        let mut new = index_hit("new", 0.5, "new text");
        new.date_published = NaiveDate::from_ymd_opt(2022, 1, 1);
        let filters = SearchFilters {
            doc_types: Vec::new(),
            date_range: Some(DateRange {
                from: NaiveDate::from_ymd_opt(2020, 1, 1),
                to: None,
            }),
        };

        let hits = fusion.fuse(
            FusionWeights::new(1.0, 0.0),
            vec![old, new, index_hit("undated", 0.3, "undated text")],
            Vec::new(),
            &filters,
            1,
        );
        assert_eq!(ids(&hits), vec!["new"]);
    }

    #[test]
    fn test_tier_weights_from_config() {
        let config = RetrievalConfig::default();
        let exact = FusionWeights::for_tier(&config, RetrievalTier::ExactLookup);
        assert_eq!(exact, FusionWeights::new(0.3, 0.7));
        let content = FusionWeights::for_tier(&config, RetrievalTier::ContentSearch);
        assert_eq!(content, FusionWeights::new(0.7, 0.3));
    }
}
