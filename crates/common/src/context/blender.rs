//! Hybrid Blender - Merges fresh hits with carried-over sources

use super::carry_over::CarriedSource;
use crate::config::BlendConfig;
use crate::models::{HitSource, HybridHit, SearchHit, TurnType};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Blends one turn's evidence into at most one hit per document
#[derive(Debug, Clone)]
pub struct HybridBlender {
    config: BlendConfig,
}

impl HybridBlender {
    pub fn new(config: BlendConfig) -> Self {
        Self { config }
    }

    /// Merge fresh chunk-level hits with carried sources.
    ///
    /// Fresh hits win on a document collision; a matching carried source
    /// boosts the fresh hit instead of adding a second entry. Unmatched
    /// carried sources become placeholders without chunk text. An empty
    /// input yields an empty output.
    pub fn blend(
        &self,
        fresh: &[SearchHit],
        carried: &[CarriedSource],
        turn_type: TurnType,
    ) -> Vec<HybridHit> {
        let carried_by_doc: HashMap<&str, &CarriedSource> = carried
            .iter()
            .map(|c| (c.source.document_id.as_str(), c))
            .collect();

        let mut groups: Vec<Vec<&SearchHit>> = Vec::new();
        let mut index_of: HashMap<&str, usize> = HashMap::new();
        for hit in fresh {
            match index_of.get(hit.document_id.as_str()) {
                Some(&i) => groups[i].push(hit),
                None => {
                    index_of.insert(&hit.document_id, groups.len());
                    groups.push(vec![hit]);
                }
            }
        }

        let mut blended: Vec<HybridHit> = Vec::with_capacity(groups.len() + carried.len());
        for mut chunks in groups {
            chunks.sort_by(|a, b| b.ranking_score().total_cmp(&a.ranking_score()));
            let best = chunks[0];
            let carried_match = carried_by_doc.contains_key(best.document_id.as_str());
            let reranked_score = if carried_match {
                (best.score * self.config.carried_match_boost).min(1.0)
            } else {
                best.score
            };

            blended.push(HybridHit {
                hit: best.clone(),
                reranked_score,
                is_carried_over: false,
                has_carried_context: carried_match,
                supporting_chunks: chunks[1..].iter().map(|c| (*c).clone()).collect(),
            });
        }

        let fresh_docs: HashSet<&str> = index_of.keys().copied().collect();
        for carried_source in carried {
            if fresh_docs.contains(carried_source.source.document_id.as_str()) {
                continue;
            }
            blended.push(placeholder(carried_source));
        }

        blended.sort_by(compare_blended);
        blended.truncate(self.config.max_results);

        debug!(
            turn_type = turn_type.as_str(),
            fresh = fresh.len(),
            carried = carried.len(),
            blended = blended.len(),
            "Blended results"
        );

        blended
    }
}

fn compare_blended(a: &HybridHit, b: &HybridHit) -> Ordering {
    b.reranked_score
        .total_cmp(&a.reranked_score)
        .then_with(|| a.is_carried_over.cmp(&b.is_carried_over))
        .then_with(|| a.hit.document_id.cmp(&b.hit.document_id))
}

fn placeholder(carried: &CarriedSource) -> HybridHit {
    let source = &carried.source;
    let score = carried.weight.clamp(0.0, 1.0);
    let title = if source.title.is_empty() {
        source.document_id.as_str()
    } else {
        source.title.as_str()
    };

    HybridHit {
        hit: SearchHit {
            document_id: source.document_id.clone(),
            chunk_id: format!("carried:{}", source.document_id),
            chunk_index: 0,
            score,
            vector_score: None,
            bm25_score: None,
            source: HitSource::Carried,
            content: format!(
                "[Carried over from earlier in this conversation] \"{}\" was cited in a previous turn; its text was not retrieved again for this question.",
                title
            ),
            title: source.title.clone(),
            doc_type: source.doc_type,
            page_range: None,
            section_title: None,
            date_published: source.date_published,
        },
        reranked_score: score,
        is_carried_over: true,
        has_carried_context: false,
        supporting_chunks: Vec::new(),
    }
}
