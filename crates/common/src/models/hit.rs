//! Search hits as produced by the index collaborators and by fusion

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Which search produced a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    /// Vector similarity only
    Vector,
    /// Lexical (BM25) only
    Bm25,
    /// Found by both searches
    Both,
    /// Placeholder for a source carried over from an earlier turn
    Carried,
}

impl HitSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HitSource::Vector => "vector",
            HitSource::Bm25 => "bm25",
            HitSource::Both => "both",
            HitSource::Carried => "carried",
        }
    }
}

/// Kind of document in the personal corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Patent,
    Paper,
    Note,
    Article,
    #[default]
    Other,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Patent => "patent",
            DocType::Paper => "paper",
            DocType::Note => "note",
            DocType::Article => "article",
            DocType::Other => "other",
        }
    }

    /// Lenient parse used by index adapters reading free-form columns
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "patent" => DocType::Patent,
            "paper" | "arxiv" | "preprint" => DocType::Paper,
            "note" | "notes" => DocType::Note,
            "article" | "press" | "blog" => DocType::Article,
            _ => DocType::Other,
        }
    }
}

/// Inclusive publication date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    /// Whether `date` falls inside the range. Undated documents always pass.
    pub fn contains(&self, date: Option<NaiveDate>) -> bool {
        let Some(date) = date else {
            return true;
        };
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

/// Optional restrictions applied to both sub-searches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SearchFilters {
    /// Restrict to these document types (empty = all)
    #[serde(default)]
    pub doc_types: Vec<DocType>,

    /// Restrict by publication date
    #[serde(default)]
    pub date_range: Option<DateRange>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.doc_types.is_empty() && self.date_range.is_none()
    }

    pub fn matches(&self, doc_type: DocType, date_published: Option<NaiveDate>) -> bool {
        let type_ok = self.doc_types.is_empty() || self.doc_types.contains(&doc_type);
        let date_ok = self
            .date_range
            .map_or(true, |range| range.contains(date_published));
        type_ok && date_ok
    }

    /// Same filters with a date range merged in (the narrower bound wins)
    pub fn with_date_range(&self, range: DateRange) -> Self {
        let merged = match self.date_range {
            None => range,
            Some(existing) => DateRange {
                from: existing.from.max(range.from),
                to: match (existing.to, range.to) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                },
            },
        };
        Self {
            doc_types: self.doc_types.clone(),
            date_range: Some(merged),
        }
    }
}

/// A scored chunk returned by one index collaborator, before fusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    pub document_id: String,
    pub chunk_id: String,
    pub chunk_index: u32,
    /// Normalised score in `[0, 1]`
    pub score: f32,
    pub content: String,
    pub title: String,
    pub doc_type: DocType,
    pub page_range: Option<String>,
    pub section_title: Option<String>,
    pub date_published: Option<NaiveDate>,
}

/// A fused, immutable search hit handed downstream by the fusion searcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: String,
    pub chunk_id: String,
    pub chunk_index: u32,

    /// Fused score in `[0, 1]`
    pub score: f32,

    /// Weighted-in vector similarity, when the vector search found the chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,

    /// Weighted-in BM25 score, when the lexical search found the chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f32>,

    pub source: HitSource,
    pub content: String,
    pub title: String,
    pub doc_type: DocType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_range: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_published: Option<NaiveDate>,
}

impl SearchHit {
    /// Score used for ordering chunks: fused score, then similarity, then BM25
    pub fn ranking_score(&self) -> f32 {
        if self.score > 0.0 {
            self.score
        } else {
            self.vector_score.or(self.bm25_score).unwrap_or(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_date_range_contains() {
        let range = DateRange {
            from: Some(date(2020, 1, 1)),
            to: Some(date(2020, 12, 31)),
        };
        assert!(range.contains(Some(date(2020, 6, 1))));
        assert!(!range.contains(Some(date(2021, 1, 1))));
        assert!(range.contains(None));
    }

    #[test]
    fn test_filters_match_doc_type() {
        let filters = SearchFilters {
            doc_types: vec![DocType::Patent],
            date_range: None,
        };
        assert!(filters.matches(DocType::Patent, None));
        assert!(!filters.matches(DocType::Paper, None));
        assert!(SearchFilters::default().matches(DocType::Note, Some(date(1999, 1, 1))));
    }

    #[test]
    fn test_with_date_range_narrows() {
        let filters = SearchFilters {
            doc_types: vec![],
            date_range: Some(DateRange {
                from: Some(date(2018, 1, 1)),
                to: Some(date(2022, 12, 31)),
            }),
        };
        let merged = filters.with_date_range(DateRange {
            from: Some(date(2020, 1, 1)),
            to: None,
        });
        let range = merged.date_range.unwrap();
        assert_eq!(range.from, Some(date(2020, 1, 1)));
        assert_eq!(range.to, Some(date(2022, 12, 31)));
    }

    #[test]
    fn test_doc_type_parse() {
        assert_eq!(DocType::parse("Patent"), DocType::Patent);
        assert_eq!(DocType::parse("arxiv"), DocType::Paper);
        assert_eq!(DocType::parse("slides"), DocType::Other);
    }
}
