//! Citations and citation groups

use super::hit::DateRange;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A chunk kept as evidence inside a citation group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub chunk_id: String,
    pub chunk_index: u32,

    /// Score the chunk was ranked by
    pub score: f32,

    pub snippet: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_range: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_published: Option<NaiveDate>,
}

/// A numbered citation for one kept chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Stable id derived from document and chunk ids
    pub id: String,
    pub source_title: String,
    pub document_id: String,
    pub chunk_index: u32,
    pub chunk_id: String,
    pub relevance_score: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_published: Option<NaiveDate>,

    pub date_accessed: DateTime<Utc>,
    pub content_snippet: String,

    /// 1-based, shared by every citation of the same group
    pub citation_number: usize,

    /// Inline marker the generated text uses to cite this chunk
    pub marker: String,

    /// Source was carried over from an earlier turn
    #[serde(default)]
    pub is_carried_over: bool,
}

/// Per-document aggregation of kept chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationGroup {
    pub source_title: String,
    pub document_id: String,

    /// Newest publication date among the group's chunks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_published: Option<NaiveDate>,

    pub chunks: Vec<ChunkRef>,

    /// Dense 1..N within one assembly
    pub citation_number: usize,

    /// Mean score of the kept chunks
    pub combined_relevance: f32,

    #[serde(default)]
    pub is_carried_over: bool,
}

impl CitationGroup {
    /// Citation marker for the group's best chunk
    pub fn marker(&self) -> String {
        match self.chunks.first() {
            Some(chunk) => citation_marker(&self.document_id, chunk),
            None => format!("[^{}]", self.document_id),
        }
    }
}

/// Marker of the form `[^{document_id}:{section}]`
pub fn citation_marker(document_id: &str, chunk: &ChunkRef) -> String {
    let section = chunk
        .section_title
        .as_deref()
        .map(slugify)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("chunk-{}", chunk.chunk_index));
    format!("[^{}:{}]", document_id, section)
}

fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in value.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// How a date conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Prefer the most recent date
    Newest,
    /// Reserved, never produced
    MostCommon,
    /// Reserved, never produced
    UserSpecified,
}

/// One titled source seen with more than one publication date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateConflict {
    pub source_title: String,

    /// Distinct dates, oldest first
    pub dates: Vec<NaiveDate>,

    pub resolution: ConflictResolution,
    pub resolved_date: NaiveDate,
}

/// Output of the citation assembler
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CitationAssembly {
    pub groups: Vec<CitationGroup>,
    pub citations: Vec<Citation>,

    /// Citation number by document id
    pub citation_map: BTreeMap<String, usize>,

    /// Span of the dated groups
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,

    pub conflicts: Vec<DateConflict>,
}

impl CitationAssembly {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(section: Option<&str>, index: u32) -> ChunkRef {
        ChunkRef {
            chunk_id: format!("c{}", index),
            chunk_index: index,
            score: 0.5,
            snippet: String::new(),
            page_range: None,
            section_title: section.map(String::from),
            date_published: None,
        }
    }

    #[test]
    fn test_marker_uses_section_slug() {
        let marker = citation_marker("doc-1", &chunk(Some("Claims & Scope"), 4));
        assert_eq!(marker, "[^doc-1:claims-scope]");
    }

    #[test]
    fn test_marker_falls_back_to_chunk_index() {
        assert_eq!(citation_marker("doc-1", &chunk(None, 7)), "[^doc-1:chunk-7]");
        assert_eq!(citation_marker("doc-1", &chunk(Some("--"), 2)), "[^doc-1:chunk-2]");
    }
}
