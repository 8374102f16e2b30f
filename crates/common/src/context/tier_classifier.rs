//! Tier Classifier - Maps a query to a retrieval tier
//!
//! Pattern families are applied in priority order:
//! 1. Exact identifiers and explicit date filters -> exact-lookup
//! 2. Entity/attribution phrasing -> metadata-semantic
//! 3. Explanatory/comparative phrasing -> content-search
//!
//! Classification never fails. A query without any signal is routed to
//! content search with low confidence.

use crate::models::{DateRange, RetrievalTier, SignalKind, TierClassification};
use crate::text::compile_pattern;
use chrono::NaiveDate;
use regex_lite::Regex;
use std::sync::OnceLock;

const NO_SIGNAL_CONFIDENCE: f32 = 0.5;

struct Patterns {
    patent: Regex,
    patent_number: Regex,
    doi: Regex,
    arxiv_prefixed: Regex,
    arxiv_bare: Regex,
    date_range: Regex,
    date_single: Regex,
    attribution_strong: Regex,
    attribution_weak: Regex,
    explanatory: Regex,
    explanatory_weak: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        patent: compile_pattern(
            r"(?i)\b(US|EP|WO|CN|JP|KR|DE|GB|FR|CA|AU)[\s-]?(\d{4}/\d{6}|\d{1,2},\d{3},\d{3}|\d{6,11})(?:\s?([AB]\d?))?\b",
        ),
        patent_number: compile_pattern(r"(?i)\bpatent\s+(?:no\.?|number|#)?\s*(\d{1,2},\d{3},\d{3}|\d{7,8})\b"),
        doi: compile_pattern(r#"(?i)\b(10\.\d{4,9}/[^\s"<>]+)"#),
        arxiv_prefixed: compile_pattern(r"(?i)\barxiv:?\s?(\d{4}\.\d{4,5}(?:v\d+)?)\b"),
        arxiv_bare: compile_pattern(r"\b(\d{4}\.\d{4,5}(?:v\d+)?)\b"),
        date_range: compile_pattern(
            r"(?i)\b(after|since|before|between|from|in|during)\s+((?:19|20)\d{2})(?:\s*(?:and|to|-)\s*((?:19|20)\d{2}))?\b",
        ),
        date_single: compile_pattern(r"(?i)\b(?:published|filed|granted|issued|dated)\s+((?:19|20)\d{2})\b"),
        attribution_strong: compile_pattern(
            r"(?i)\b(who\s+(?:invented|wrote|authored|filed|created|developed|owns)|who\s+(?:are|were|is|was)\s+the\s+(?:inventors?|authors?|assignees?|applicants?)|(?:authors?|inventors?|assignees?|applicants?)\s+of|(?:written|invented|filed|assigned|authored)\s+by)\b",
        ),
        attribution_weak: compile_pattern(r"(?i)\b(authors?|inventors?|assignees?|applicants?|owners?|publishers?)\b"),
        explanatory: compile_pattern(
            r"(?i)\b(how\s+(?:does|do|did|is|are|can|would)|explain|why|describe|difference\s+between|differences\s+between|compare|comparison|versus|vs\.?|advantages?|disadvantages?|trade-?offs?)\b",
        ),
        explanatory_weak: compile_pattern(r"(?i)\b(what\s+(?:is|are|was|were)|summari[sz]e|overview)\b"),
    })
}

/// Stateless query tier classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct TierClassifier;

impl TierClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a raw query string
    pub fn classify(&self, query: &str) -> TierClassification {
        let query = query.trim();
        let p = patterns();
        let date_filter = parse_date_filter(query);

        if let Some(caps) = p.patent.captures(query) {
            let kind_code = caps.get(3).map(|m| m.as_str().to_uppercase());
            let identifier = format!(
                "{}{}{}",
                caps[1].to_uppercase(),
                caps[2].replace([',', '/'], ""),
                kind_code.as_deref().unwrap_or("")
            );
            let confidence = if kind_code.is_some() { 0.98 } else { 0.95 };
            return exact(
                identifier,
                SignalKind::PatentNumber,
                confidence,
                date_filter.map(|(r, _)| r),
                "patent number",
            );
        }

        if let Some(caps) = p.patent_number.captures(query) {
            return exact(
                caps[1].replace(',', ""),
                SignalKind::PatentNumber,
                0.95,
                date_filter.map(|(r, _)| r),
                "patent number",
            );
        }

        if let Some(caps) = p.doi.captures(query) {
            let doi = caps[1].trim_end_matches(['.', ',', ';', ')']).to_string();
            return exact(doi, SignalKind::Doi, 0.97, date_filter.map(|(r, _)| r), "DOI");
        }

        if let Some(caps) = p.arxiv_prefixed.captures(query) {
            return exact(
                caps[1].to_string(),
                SignalKind::ArxivId,
                0.95,
                date_filter.map(|(r, _)| r),
                "arXiv identifier",
            );
        }

        if let Some(caps) = p.arxiv_bare.captures(query) {
            return exact(
                caps[1].to_string(),
                SignalKind::ArxivId,
                0.85,
                date_filter.map(|(r, _)| r),
                "arXiv-style identifier",
            );
        }

        if let Some((range, matched)) = date_filter {
            return TierClassification {
                tier: RetrievalTier::ExactLookup,
                confidence: 0.8,
                explanation: format!("Explicit date filter '{}'", matched),
                matched_signal: Some(matched),
                signal_kind: Some(SignalKind::DateFilter),
                date_range: Some(range),
            };
        }

        if let Some(m) = p.attribution_strong.find(query) {
            return semantic(
                RetrievalTier::MetadataSemantic,
                m.as_str(),
                SignalKind::Attribution,
                0.85,
                "Attribution question",
            );
        }

        if let Some(m) = p.attribution_weak.find(query) {
            return semantic(
                RetrievalTier::MetadataSemantic,
                m.as_str(),
                SignalKind::Attribution,
                0.7,
                "Attribution keyword",
            );
        }

        if let Some(m) = p.explanatory.find(query) {
            return semantic(
                RetrievalTier::ContentSearch,
                m.as_str(),
                SignalKind::Explanatory,
                0.8,
                "Explanatory or comparative question",
            );
        }

        if let Some(m) = p.explanatory_weak.find(query) {
            return semantic(
                RetrievalTier::ContentSearch,
                m.as_str(),
                SignalKind::Explanatory,
                0.65,
                "Definitional question",
            );
        }

        TierClassification {
            tier: RetrievalTier::ContentSearch,
            confidence: NO_SIGNAL_CONFIDENCE,
            matched_signal: None,
            signal_kind: None,
            date_range: None,
            explanation: "No routing signal; defaulting to content search".to_string(),
        }
    }
}

fn exact(
    identifier: String,
    kind: SignalKind,
    confidence: f32,
    date_range: Option<DateRange>,
    label: &str,
) -> TierClassification {
    TierClassification {
        tier: RetrievalTier::ExactLookup,
        confidence,
        explanation: format!("Matched {} '{}'", label, identifier),
        matched_signal: Some(identifier),
        signal_kind: Some(kind),
        date_range,
    }
}

fn semantic(
    tier: RetrievalTier,
    matched: &str,
    kind: SignalKind,
    confidence: f32,
    label: &str,
) -> TierClassification {
    TierClassification {
        tier,
        confidence,
        explanation: format!("{} ('{}')", label, matched),
        matched_signal: Some(matched.to_string()),
        signal_kind: Some(kind),
        date_range: None,
    }
}

fn year_start(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 1, 1)
}

fn year_end(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 12, 31)
}

/// Parse an explicit publication-date filter into a range and the matched text
pub fn parse_date_filter(query: &str) -> Option<(DateRange, String)> {
    let p = patterns();

    if let Some(caps) = p.date_range.captures(query) {
        let keyword = caps[1].to_lowercase();
        let first: i32 = caps[2].parse().ok()?;
        let second: Option<i32> = caps.get(3).and_then(|m| m.as_str().parse().ok());
        let matched = caps[0].to_string();

        let range = match (keyword.as_str(), second) {
            ("between" | "from", Some(second)) => {
                let (lo, hi) = if first <= second { (first, second) } else { (second, first) };
                DateRange {
                    from: year_start(lo),
                    to: year_end(hi),
                }
            }
            ("between", None) => return None,
            ("after", _) => DateRange {
                from: year_start(first + 1),
                to: None,
            },
            ("since" | "from", _) => DateRange {
                from: year_start(first),
                to: None,
            },
            ("before", _) => DateRange {
                from: None,
                to: year_end(first - 1),
            },
            // "in" / "during"
            _ => DateRange {
                from: year_start(first),
                to: year_end(first),
            },
        };
        return Some((range, matched));
    }

    if let Some(caps) = p.date_single.captures(query) {
        let year: i32 = caps[1].parse().ok()?;
        return Some((
            DateRange {
                from: year_start(year),
                to: year_end(year),
            },
            caps[0].to_string(),
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(query: &str) -> TierClassification {
        TierClassifier::new().classify(query)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_patent_numbers_are_exact_lookups() {
        for query in [
            "Patent US11234567",
            "Patent US11281020B2 claims",
            "what does US 10,123,456 cover",
            "EP3456789 A1 summary",
            "show me patent number 9876543",
        ] {
            let result = classify(query);
            assert_eq!(result.tier, RetrievalTier::ExactLookup, "query: {}", query);
            assert_eq!(result.signal_kind, Some(SignalKind::PatentNumber));
        }
    }

    #[test]
    fn test_patent_identifier_is_normalised() {
        let result = classify("Patent US11281020B2 claims");
        assert_eq!(result.matched_signal.as_deref(), Some("US11281020B2"));
        assert!(result.confidence > 0.95);

        let result = classify("what does US 10,123,456 cover");
        assert_eq!(result.matched_signal.as_deref(), Some("US10123456"));
    }

    #[test]
    fn test_doi_and_arxiv() {
        let doi = classify("find 10.1038/s41586-020-2649-2.");
        assert_eq!(doi.tier, RetrievalTier::ExactLookup);
        assert_eq!(doi.matched_signal.as_deref(), Some("10.1038/s41586-020-2649-2"));

        let arxiv = classify("summarise arXiv:2106.09685v2");
        assert_eq!(arxiv.signal_kind, Some(SignalKind::ArxivId));
        assert_eq!(arxiv.confidence, 0.95);

        let bare = classify("what is 1706.03762 about");
        assert_eq!(bare.tier, RetrievalTier::ExactLookup);
        assert_eq!(bare.confidence, 0.85);
    }

    #[test]
    fn test_date_filters() {
        let result = classify("battery patents filed after 2019");
        assert_eq!(result.tier, RetrievalTier::ExactLookup);
        assert_eq!(result.signal_kind, Some(SignalKind::DateFilter));
        let range = result.date_range.unwrap();
        assert_eq!(range.from, Some(date(2020, 1, 1)));
        assert_eq!(range.to, None);

        let (range, _) = parse_date_filter("papers between 2021 and 2018").unwrap();
        assert_eq!(range.from, Some(date(2018, 1, 1)));
        assert_eq!(range.to, Some(date(2021, 12, 31)));

        let (range, _) = parse_date_filter("notes before 2000").unwrap();
        assert_eq!(range.to, Some(date(1999, 12, 31)));

        let (range, _) = parse_date_filter("anything published 2022").unwrap();
        assert_eq!(range.from, Some(date(2022, 1, 1)));
        assert_eq!(range.to, Some(date(2022, 12, 31)));
    }

    #[test]
    fn test_attribution_is_metadata_semantic() {
        let result = classify("Who invented the solid-state separator?");
        assert_eq!(result.tier, RetrievalTier::MetadataSemantic);
        assert_eq!(result.confidence, 0.85);
        assert!(result.is_metadata_query());

        let result = classify("list the inventors of this design");
        assert_eq!(result.tier, RetrievalTier::MetadataSemantic);

        let weak = classify("assignee information");
        assert_eq!(weak.tier, RetrievalTier::MetadataSemantic);
        assert_eq!(weak.confidence, 0.7);
    }

    #[test]
    fn test_explanatory_is_content_search() {
        let result = classify("How does the anode coating prevent dendrites?");
        assert_eq!(result.tier, RetrievalTier::ContentSearch);
        assert_eq!(result.confidence, 0.8);

        let result = classify("difference between LFP and NMC cells");
        assert_eq!(result.tier, RetrievalTier::ContentSearch);
    }

    #[test]
    fn test_no_signal_defaults_low_confidence() {
        let result = classify("lithium sulfur");
        assert_eq!(result.tier, RetrievalTier::ContentSearch);
        assert!(result.confidence <= 0.6);
        assert!(result.matched_signal.is_none());

        let empty = classify("   ");
        assert_eq!(empty.tier, RetrievalTier::ContentSearch);
    }

    #[test]
    fn test_exact_beats_attribution() {
        let result = classify("who are the inventors of US11234567");
        assert_eq!(result.tier, RetrievalTier::ExactLookup);
    }
}
