//! Citation Assembler - Groups blended hits into numbered citations
//!
//! Provides:
//! - Per-document grouping with best-chunk selection
//! - Recency-aware ordering with dense 1..N numbering
//! - Date conflict detection per source title
//! - Snippet extraction and context rendering
//!
//! Assembly is a pure function of its inputs: every call builds a fresh
//! ordered sequence and numbers it last.

use crate::config::CitationConfig;
use crate::models::{
    citation_marker, ChunkRef, Citation, CitationAssembly, CitationGroup, ConflictResolution,
    DateConflict, DateRange, HybridHit,
};
use chrono::{DateTime, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Tenths of the snippet limit after which a sentence end is accepted
const SENTENCE_BREAK_TENTHS: usize = 7;

/// Tenths of the snippet limit after which a word break is accepted
const WORD_BREAK_TENTHS: usize = 8;

/// A group before numbering
struct DraftGroup {
    source_title: String,
    document_id: String,
    chunks: Vec<ChunkRef>,
    all_dates: BTreeSet<NaiveDate>,
    combined_relevance: f32,
    is_carried_over: bool,
}

impl DraftGroup {
    fn newest_date(&self) -> Option<NaiveDate> {
        self.all_dates.iter().next_back().copied()
    }
}

/// Builds citation groups from blended hits
#[derive(Debug, Clone)]
pub struct CitationAssembler {
    config: CitationConfig,
}

impl CitationAssembler {
    pub fn new(config: CitationConfig) -> Self {
        Self { config }
    }

    /// Same assembler with per-request grouping overridden
    pub fn with_group_by_source(&self, group_by_source: bool) -> Self {
        let mut config = self.config.clone();
        config.group_by_source = group_by_source;
        Self { config }
    }

    /// Group, order, number and cite the blended hits
    pub fn assemble(&self, hits: &[HybridHit], accessed_at: DateTime<Utc>) -> CitationAssembly {
        let mut drafts = self.build_drafts(hits);

        // Strongest evidence first, then optionally let clearly newer sources move up.
        drafts.sort_by(|a, b| b.combined_relevance.total_cmp(&a.combined_relevance));
        if self.config.prefer_recent {
            drafts = recency_order(drafts, self.config.recency_threshold_days);
        }
        drafts.truncate(self.config.max_sources);

        let groups = number_groups(drafts.iter());
        let citations = build_citations(&groups, accessed_at);
        let citation_map = groups
            .iter()
            .map(|g| (g.document_id.clone(), g.citation_number))
            .collect();
        let conflicts = detect_conflicts(&drafts);
        let date_range = overall_date_range(&groups);

        debug!(
            hits = hits.len(),
            groups = groups.len(),
            citations = citations.len(),
            conflicts = conflicts.len(),
            "Citations assembled"
        );

        CitationAssembly {
            groups,
            citations,
            citation_map,
            date_range,
            conflicts,
        }
    }

    fn build_drafts(&self, hits: &[HybridHit]) -> Vec<DraftGroup> {
        let keep = if self.config.group_by_source {
            1
        } else {
            self.config.max_chunks_per_source.max(1)
        };

        let mut drafts: Vec<DraftGroup> = Vec::new();
        let mut index_of: HashMap<&str, usize> = HashMap::new();

        for hybrid in hits {
            let primary = &hybrid.hit;
            let i = *index_of.entry(primary.document_id.as_str()).or_insert_with(|| {
                drafts.push(DraftGroup {
                    source_title: primary.title.clone(),
                    document_id: primary.document_id.clone(),
                    chunks: Vec::new(),
                    all_dates: BTreeSet::new(),
                    combined_relevance: 0.0,
                    is_carried_over: true,
                });
                drafts.len() - 1
            });
            let draft = &mut drafts[i];
            draft.is_carried_over &= hybrid.is_carried_over;

            draft.chunks.push(self.chunk_ref(primary, hybrid.reranked_score));
            for supporting in &hybrid.supporting_chunks {
                draft.chunks.push(self.chunk_ref(supporting, supporting.ranking_score()));
            }
        }

        for draft in &mut drafts {
            draft.all_dates = draft.chunks.iter().filter_map(|c| c.date_published).collect();
            draft.chunks.sort_by(|a, b| b.score.total_cmp(&a.score));
            draft.chunks.truncate(keep);
            draft.combined_relevance =
                draft.chunks.iter().map(|c| c.score).sum::<f32>() / draft.chunks.len().max(1) as f32;
        }

        drafts
    }

    fn chunk_ref(&self, hit: &crate::models::SearchHit, score: f32) -> ChunkRef {
        ChunkRef {
            chunk_id: hit.chunk_id.clone(),
            chunk_index: hit.chunk_index,
            score,
            snippet: extract_snippet(&hit.content, self.config.snippet_length),
            page_range: hit.page_range.clone(),
            section_title: hit.section_title.clone(),
            date_published: hit.date_published,
        }
    }
}

/// Whether `a` belongs before `b`: a clearly newer date wins, otherwise relevance
fn recency_precedes(a: &DraftGroup, b: &DraftGroup, threshold_days: i64) -> bool {
    if let (Some(da), Some(db)) = (a.newest_date(), b.newest_date()) {
        let days = (da - db).num_days();
        if days.abs() > threshold_days {
            return days > 0;
        }
    }
    a.combined_relevance.total_cmp(&b.combined_relevance) == Ordering::Greater
}

/// Stable insertion pass. The precedence rule is not transitive, so a
/// comparison sort could reject it.
fn recency_order(drafts: Vec<DraftGroup>, threshold_days: i64) -> Vec<DraftGroup> {
    let mut ordered: Vec<DraftGroup> = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let mut position = ordered.len();
        while position > 0 && recency_precedes(&draft, &ordered[position - 1], threshold_days) {
            position -= 1;
        }
        ordered.insert(position, draft);
    }
    ordered
}

fn number_groups<'a>(drafts: impl Iterator<Item = &'a DraftGroup>) -> Vec<CitationGroup> {
    drafts
        .enumerate()
        .map(|(i, draft)| CitationGroup {
            source_title: draft.source_title.clone(),
            document_id: draft.document_id.clone(),
            date_published: draft.newest_date(),
            chunks: draft.chunks.clone(),
            citation_number: i + 1,
            combined_relevance: draft.combined_relevance,
            is_carried_over: draft.is_carried_over,
        })
        .collect()
}

/// First 16 hex chars of `sha256(document_id:chunk_id)`
pub fn citation_id(document_id: &str, chunk_id: &str) -> String {
    let digest = Sha256::new()
        .chain_update(document_id.as_bytes())
        .chain_update(b":")
        .chain_update(chunk_id.as_bytes())
        .finalize();
    hex::encode(digest)[..16].to_string()
}

fn build_citations(groups: &[CitationGroup], accessed_at: DateTime<Utc>) -> Vec<Citation> {
    groups
        .iter()
        .flat_map(|group| {
            group.chunks.iter().map(move |chunk| Citation {
                id: citation_id(&group.document_id, &chunk.chunk_id),
                source_title: group.source_title.clone(),
                document_id: group.document_id.clone(),
                chunk_index: chunk.chunk_index,
                chunk_id: chunk.chunk_id.clone(),
                relevance_score: chunk.score,
                date_published: chunk.date_published.or(group.date_published),
                date_accessed: accessed_at,
                content_snippet: chunk.snippet.clone(),
                citation_number: group.citation_number,
                marker: citation_marker(&group.document_id, chunk),
                is_carried_over: group.is_carried_over,
            })
        })
        .collect()
}

fn detect_conflicts(drafts: &[DraftGroup]) -> Vec<DateConflict> {
    let mut by_title: BTreeMap<&str, BTreeSet<NaiveDate>> = BTreeMap::new();
    for draft in drafts {
        if draft.source_title.trim().is_empty() {
            continue;
        }
        by_title
            .entry(draft.source_title.as_str())
            .or_default()
            .extend(draft.all_dates.iter().copied());
    }

    by_title
        .into_iter()
        .filter(|(_, dates)| dates.len() > 1)
        .filter_map(|(title, dates)| {
            let resolved_date = *dates.iter().next_back()?;
            Some(DateConflict {
                source_title: title.to_string(),
                dates: dates.into_iter().collect(),
                resolution: ConflictResolution::Newest,
                resolved_date,
            })
        })
        .collect()
}

fn overall_date_range(groups: &[CitationGroup]) -> Option<DateRange> {
    let from = groups.iter().filter_map(|g| g.date_published).min()?;
    let to = groups.iter().filter_map(|g| g.date_published).max()?;
    Some(DateRange {
        from: Some(from),
        to: Some(to),
    })
}

/// Truncate `content` to at most `max_chars` characters.
///
/// Prefers ending at a sentence boundary in the last 30% of the limit,
/// then at a word boundary in the last 20% (with an ellipsis), and
/// otherwise cuts hard with an ellipsis.
pub fn extract_snippet(content: &str, max_chars: usize) -> String {
    let content = content.trim();
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= max_chars {
        return content.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }

    let sentence_floor = (max_chars * SENTENCE_BREAK_TENTHS).div_ceil(10);
    for end in (sentence_floor.max(1)..=max_chars).rev() {
        let last = chars[end - 1];
        let followed_by_space = chars.get(end).map_or(true, |c| c.is_whitespace());
        if matches!(last, '.' | '!' | '?') && followed_by_space {
            return chars[..end].iter().collect();
        }
    }

    let word_floor = (max_chars * WORD_BREAK_TENTHS).div_ceil(10);
    for end in (word_floor.max(1)..=max_chars).rev() {
        if chars[end].is_whitespace() {
            let head: String = chars[..end].iter().collect();
            return format!("{}...", head.trim_end());
        }
    }

    let head: String = chars[..max_chars].iter().collect();
    format!("{}...", head)
}

/// Render the context block handed to the generation collaborator
pub fn render_context(assembly: &CitationAssembly) -> String {
    let mut out = String::new();
    for group in &assembly.groups {
        let date = group
            .date_published
            .map(|d| format!(" ({})", d))
            .unwrap_or_default();
        let carried = if group.is_carried_over {
            " [from earlier in this conversation]"
        } else {
            ""
        };
        out.push_str(&format!(
            "[{}] {}{}{} {}\n",
            group.citation_number,
            group.source_title,
            date,
            carried,
            group.marker()
        ));
        for chunk in &group.chunks {
            out.push_str(&chunk.snippet);
            out.push('\n');
        }
        out.push('\n');
    }

    if !assembly.conflicts.is_empty() {
        out.push_str("Date conflicts (newest date preferred):\n");
        for conflict in &assembly.conflicts {
            let dates: Vec<String> = conflict.dates.iter().map(|d| d.to_string()).collect();
            out.push_str(&format!(
                "- {}: {} -> {}\n",
                conflict.source_title,
                dates.join(", "),
                conflict.resolved_date
            ));
        }
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocType, HitSource, SearchHit};
    use rand::Rng;
    use std::collections::HashSet;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn search_hit(doc: &str, chunk: u32, score: f32, published: Option<NaiveDate>) -> SearchHit {
        SearchHit {
            document_id: doc.to_string(),
            chunk_id: format!("{}-{}", doc, chunk),
            chunk_index: chunk,
            score,
            vector_score: Some(score),
            bm25_score: None,
            source: HitSource::Vector,
            content: format!("Chunk {} of document {}.", chunk, doc),
            title: format!("Title {}", doc),
            doc_type: DocType::Patent,
            page_range: None,
            section_title: None,
            date_published: published,
        }
    }

    fn hybrid(doc: &str, score: f32, published: Option<NaiveDate>) -> HybridHit {
        HybridHit {
            hit: search_hit(doc, 0, score, published),
            reranked_score: score,
            is_carried_over: false,
            has_carried_context: false,
            supporting_chunks: Vec::new(),
        }
    }

    fn assembler() -> CitationAssembler {
        CitationAssembler::new(CitationConfig::default())
    }

    fn numbers(assembly: &CitationAssembly) -> Vec<usize> {
        assembly.groups.iter().map(|g| g.citation_number).collect()
    }

    #[test]
    fn test_groups_are_numbered_densely() {
        let hits = vec![hybrid("A", 0.9, None), hybrid("B", 0.7, None), hybrid("C", 0.8, None)];
        let assembly = assembler().assemble(&hits, Utc::now());

        let docs: Vec<&str> = assembly.groups.iter().map(|g| g.document_id.as_str()).collect();
        assert_eq!(docs, vec!["A", "C", "B"]);
        assert_eq!(numbers(&assembly), vec![1, 2, 3]);
        assert_eq!(assembly.citation_map["B"], 3);
        assert_eq!(assembly.citations.len(), 3);
    }

    #[test]
    fn test_recency_beats_small_relevance_gap() {
        let hits = vec![
            hybrid("old", 0.9, Some(date(2019, 3, 1))),
            hybrid("new", 0.6, Some(date(2023, 3, 1))),
        ];
        let assembly = assembler().assemble(&hits, Utc::now());
        assert_eq!(assembly.groups[0].document_id, "new");
        assert_eq!(numbers(&assembly), vec![1, 2]);
    }

    #[test]
    fn test_one_day_difference_falls_back_to_relevance() {
        let hits = vec![
            hybrid("strong", 0.9, Some(date(2023, 3, 1))),
            hybrid("weak", 0.4, Some(date(2023, 3, 2))),
        ];
        let assembly = assembler().assemble(&hits, Utc::now());
        assert_eq!(assembly.groups[0].document_id, "strong");
    }

    #[test]
    fn test_chunk_dates_in_one_document_conflict() {
        let mut hit = hybrid("D", 0.8, Some(date(2021, 1, 1)));
        hit.supporting_chunks
            .push(search_hit("D", 4, 0.5, Some(date(2022, 6, 1))));
        let assembly = assembler().assemble(&[hit], Utc::now());

        assert_eq!(assembly.groups.len(), 1);
        assert_eq!(assembly.groups[0].chunks.len(), 1);
        assert_eq!(assembly.groups[0].date_published, Some(date(2022, 6, 1)));
        assert_eq!(assembly.conflicts.len(), 1);
        let conflict = &assembly.conflicts[0];
        assert_eq!(conflict.resolution, ConflictResolution::Newest);
        assert_eq!(conflict.resolved_date, date(2022, 6, 1));
        assert_eq!(conflict.dates, vec![date(2021, 1, 1), date(2022, 6, 1)]);
    }

    #[test]
    fn test_ungrouped_keeps_up_to_three_chunks() {
        let mut hit = hybrid("D", 0.9, None);
        for (i, score) in [0.3, 0.6, 0.5, 0.2].into_iter().enumerate() {
            hit.supporting_chunks.push(search_hit("D", i as u32 + 1, score, None));
        }

        let grouped = assembler().assemble(&[hit.clone()], Utc::now());
        assert_eq!(grouped.groups[0].chunks.len(), 1);
        assert!((grouped.groups[0].combined_relevance - 0.9).abs() < 1e-6);

        let ungrouped = assembler().with_group_by_source(false).assemble(&[hit], Utc::now());
        let group = &ungrouped.groups[0];
        assert_eq!(group.chunks.len(), 3);
        assert!((group.combined_relevance - (0.9 + 0.6 + 0.5) / 3.0).abs() < 1e-6);
        assert_eq!(ungrouped.citations.len(), 3);
        assert!(ungrouped.citations.iter().all(|c| c.citation_number == 1));
    }

    #[test]
    fn test_max_sources_cap() {
        let hits: Vec<HybridHit> = (0..12)
            .map(|i| hybrid(&format!("doc-{:02}", i), 1.0 - i as f32 * 0.05, None))
            .collect();
        let assembly = assembler().assemble(&hits, Utc::now());
        assert_eq!(assembly.groups.len(), 8);
        assert_eq!(numbers(&assembly), (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn test_numbering_is_dense_for_random_inputs() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let hits: Vec<HybridHit> = (0..rng.gen_range(0..15))
                .map(|i| {
                    let published = rng
                        .gen_bool(0.7)
                        .then(|| date(rng.gen_range(2015..2025), rng.gen_range(1..13), rng.gen_range(1..29)));
                    hybrid(&format!("doc-{}", i % 10), rng.gen_range(0.0..1.0), published)
                })
                .collect();

            let assembly = assembler().assemble(&hits, Utc::now());
            let expected: Vec<usize> = (1..=assembly.groups.len()).collect();
            assert_eq!(numbers(&assembly), expected);

            let docs: HashSet<&str> = assembly.groups.iter().map(|g| g.document_id.as_str()).collect();
            assert_eq!(docs.len(), assembly.groups.len());
        }
    }

    #[test]
    fn test_citation_ids_are_stable() {
        let a = citation_id("doc", "chunk-1");
        assert_eq!(a.len(), 16);
        assert_eq!(a, citation_id("doc", "chunk-1"));
        assert_ne!(a, citation_id("doc", "chunk-2"));
    }

    #[test]
    fn test_snippet_short_content_untouched() {
        assert_eq!(extract_snippet("  Short text.  ", 50), "Short text.");
    }

    #[test]
    fn test_snippet_prefers_sentence_boundary() {
        let content = "The separator is coated with alumina. It resists dendrites well.";
        // Limit 50: the first sentence ends at char 37, inside the last 30%.
        let snippet = extract_snippet(content, 50);
        assert_eq!(snippet, "The separator is coated with alumina.");
    }

    #[test]
    fn test_snippet_falls_back_to_word_boundary() {
        let content = "alpha beta gamma delta epsilon zeta eta theta";
        let snippet = extract_snippet(content, 20);
        assert_eq!(snippet, "alpha beta gamma...");
    }

    #[test]
    fn test_snippet_hard_cut() {
        let content = "abcdefghijklmnopqrstuvwxyz";
        assert_eq!(extract_snippet(content, 10), "abcdefghij...");
    }

    #[test]
    fn test_render_context_lists_groups() {
        let hits = vec![hybrid("A", 0.9, Some(date(2020, 5, 1)))];
        let assembly = assembler().assemble(&hits, Utc::now());
        let rendered = render_context(&assembly);
        assert!(rendered.starts_with("[1] Title A (2020-05-01) [^A:chunk-0]"));
        assert!(rendered.contains("Chunk 0 of document A."));
    }
}
