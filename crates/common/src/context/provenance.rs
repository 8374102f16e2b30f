//! Provenance Scorer - Estimates how much of a generated answer is grounded
//!
//! Composite of four signals:
//! - 60% whether the response contains any citation marker
//! - 25% share of factual sentences that carry a marker
//! - 10% word-trigram overlap between response and retrieved text
//! - 5% mean search score of the retrieved chunks
//!
//! The score is advisory telemetry. It never blocks a response.

use crate::models::{CitationAssembly, ProvenanceBreakdown, ProvenanceScore};
use crate::text::{compile_pattern, words};
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

const CITATION_PRESENCE_WEIGHT: f32 = 0.6;
const FACTUAL_DENSITY_WEIGHT: f32 = 0.25;
const TOKEN_OVERLAP_WEIGHT: f32 = 0.1;
const SEARCH_QUALITY_WEIGHT: f32 = 0.05;

const MONTHS: &[&str] = &[
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

struct Patterns {
    marker: Regex,
    leading_marker: Regex,
    hedge: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        marker: compile_pattern(r"\[\^[^\]\s]+\]"),
        leading_marker: compile_pattern(r"^\s*\[\^[^\]\s]+\]"),
        hedge: compile_pattern(
            r"(?i)\b(might|perhaps|possibly|probably|maybe|likely|i\s+think|i\s+believe|it\s+seems|could\s+be|may\s+be|not\s+sure|unclear)\b",
        ),
    })
}

/// A response sentence with its citation markers removed
#[derive(Debug)]
struct Sentence {
    text: String,
    markers: usize,
}

/// Scores generated text against the evidence it was given
#[derive(Debug, Clone, Copy, Default)]
pub struct ProvenanceScorer;

impl ProvenanceScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score `response` against retrieved `context` texts and their search scores
    pub fn score(&self, response: &str, context: &[String], search_scores: &[f32]) -> ProvenanceScore {
        let citation_presence = if patterns().marker.is_match(response) {
            1.0
        } else {
            0.0
        };

        let breakdown = ProvenanceBreakdown {
            citation_presence,
            factual_density: factual_density(response),
            token_overlap: trigram_overlap(response, context),
            search_quality: mean_score(search_scores),
        };

        let composite = breakdown.citation_presence * CITATION_PRESENCE_WEIGHT
            + breakdown.factual_density * FACTUAL_DENSITY_WEIGHT
            + breakdown.token_overlap * TOKEN_OVERLAP_WEIGHT
            + breakdown.search_quality * SEARCH_QUALITY_WEIGHT;

        ProvenanceScore {
            value: round2(composite.clamp(0.0, 1.0)),
            breakdown,
        }
    }

    /// Score `response` against the snippets and chunk scores of an assembly
    pub fn score_assembly(&self, response: &str, assembly: &CitationAssembly) -> ProvenanceScore {
        let chunks = assembly.groups.iter().flat_map(|g| g.chunks.iter());
        let context: Vec<String> = chunks.clone().map(|c| c.snippet.clone()).collect();
        let scores: Vec<f32> = chunks.map(|c| c.score).collect();
        self.score(response, &context, &scores)
    }
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

fn mean_score(scores: &[f32]) -> f32 {
    if scores.is_empty() {
        return 0.0;
    }
    let sum: f32 = scores.iter().map(|s| s.clamp(0.0, 1.0)).sum();
    sum / scores.len() as f32
}

/// Split into sentences. Markers that open a sentence are credited to the
/// previous one, so `claim.[^a] Next.` attributes `[^a]` to `claim.`
fn sentences(response: &str) -> Vec<Sentence> {
    let p = patterns();
    let chars: Vec<char> = response.chars().collect();
    let mut raw: Vec<String> = Vec::new();
    let mut current = String::new();
    for (i, c) in chars.iter().enumerate() {
        current.push(*c);
        let ends = matches!(c, '.' | '!' | '?')
            && chars.get(i + 1).map_or(true, |next| next.is_whitespace() || *next == '[');
        if ends {
            raw.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        raw.push(current);
    }

    let mut out: Vec<Sentence> = Vec::new();
    for piece in raw {
        let mut rest = piece.as_str();
        let mut leading = 0;
        while let Some(m) = p.leading_marker.find(rest) {
            leading += 1;
            rest = &rest[m.end()..];
        }
        if leading > 0 {
            if let Some(previous) = out.last_mut() {
                previous.markers += leading;
                leading = 0;
            }
        }

        let markers = leading + p.marker.find_iter(rest).count();
        let text = p.marker.replace_all(rest, "").trim().to_string();
        let has_words = text.chars().any(|c| c.is_alphanumeric());
        if !has_words {
            if let Some(previous) = out.last_mut() {
                previous.markers += markers;
                continue;
            }
            if markers == 0 {
                continue;
            }
        }
        out.push(Sentence { text, markers });
    }
    out
}

fn is_factual(sentence: &str) -> bool {
    let trimmed = sentence.trim();
    if trimmed.is_empty() || trimmed.ends_with('?') || patterns().hedge.is_match(trimmed) {
        return false;
    }
    if trimmed.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }

    let tokens: Vec<&str> = trimmed
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| !t.is_empty())
        .collect();

    tokens.iter().enumerate().any(|(i, token)| {
        let capitals = token.chars().filter(|c| c.is_uppercase()).count();
        let capitalised = token.chars().next().is_some_and(|c| c.is_uppercase());
        capitals >= 2 || (i > 0 && capitalised) || MONTHS.contains(token)
    })
}

fn factual_density(response: &str) -> f32 {
    let factual: Vec<Sentence> = sentences(response)
        .into_iter()
        .filter(|s| is_factual(&s.text))
        .collect();
    if factual.is_empty() {
        return 0.0;
    }
    let cited = factual.iter().filter(|s| s.markers > 0).count();
    cited as f32 / factual.len() as f32
}

fn trigrams(tokens: &[String]) -> HashSet<(&str, &str, &str)> {
    tokens
        .windows(3)
        .map(|w| (w[0].as_str(), w[1].as_str(), w[2].as_str()))
        .collect()
}

fn trigram_overlap(response: &str, context: &[String]) -> f32 {
    let stripped = patterns().marker.replace_all(response, " ");
    let response_words = words(&stripped);
    if response_words.len() < 3 || context.is_empty() {
        return 0.0;
    }
    let response_trigrams = trigrams(&response_words);

    let context_words: Vec<Vec<String>> = context.iter().map(|c| words(c)).collect();
    let context_trigrams: HashSet<(&str, &str, &str)> =
        context_words.iter().flat_map(|w| trigrams(w)).collect();

    let shared = response_trigrams.intersection(&context_trigrams).count();
    shared as f32 / response_trigrams.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkRef, CitationGroup};

    fn scorer() -> ProvenanceScorer {
        ProvenanceScorer::new()
    }

    #[test]
    fn test_no_markers_means_no_citation_presence() {
        let score = scorer().score(
            "The cell retains 80 percent capacity after 500 cycles.",
            &["The cell retains 80 percent capacity after 500 cycles.".to_string()],
            &[1.0],
        );
        assert_eq!(score.breakdown.citation_presence, 0.0);
        assert_eq!(score.breakdown.factual_density, 0.0);
        assert_eq!(score.breakdown.token_overlap, 1.0);
        // 0.1 * 1.0 + 0.05 * 1.0
        assert!((score.value - 0.15).abs() < 1e-6);
    }

    #[test]
    fn test_fully_cited_grounded_answer() {
        let context = vec!["the separator uses a ceramic coating of alumina".to_string()];
        let response = "The separator uses a ceramic coating of alumina.[^US1234567:claims]";
        let score = scorer().score(response, &context, &[1.0]);

        assert_eq!(score.breakdown.citation_presence, 1.0);
        assert_eq!(score.breakdown.factual_density, 0.0);
        assert_eq!(score.breakdown.token_overlap, 1.0);
        assert!((score.value - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_factual_density_counts_cited_factual_sentences() {
        let response = "Toyota filed the patent in 2019 [^a:claims]. The coating is 3 um thick. \
                        It might help with dendrites.";
        let density = factual_density(response);
        assert!((density - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_marker_after_period_credits_previous_sentence() {
        let parsed = sentences("Samsung owns it.[^b:1] It was filed by LG.");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].markers, 1);
        assert_eq!(parsed[1].markers, 0);
    }

    #[test]
    fn test_questions_and_hedges_are_not_factual() {
        assert!(!is_factual("Was it filed in 2019?"));
        assert!(!is_factual("It is probably from IBM."));
        assert!(is_factual("The assignee is IBM."));
        assert!(is_factual("It was granted in March."));
        assert!(!is_factual("the coating helps a lot."));
    }

    #[test]
    fn test_short_response_has_no_overlap() {
        assert_eq!(trigram_overlap("Yes indeed", &["yes indeed".to_string()]), 0.0);
    }

    #[test]
    fn test_score_assembly_uses_chunk_snippets() {
        let assembly = CitationAssembly {
            groups: vec![CitationGroup {
                source_title: "Battery".into(),
                document_id: "D".into(),
                date_published: None,
                chunks: vec![ChunkRef {
                    chunk_id: "D-0".into(),
                    chunk_index: 0,
                    score: 0.6,
                    snippet: "solid electrolyte interphase growth".into(),
                    page_range: None,
                    section_title: None,
                    date_published: None,
                }],
                citation_number: 1,
                combined_relevance: 0.6,
                is_carried_over: false,
            }],
            ..Default::default()
        };
        let score = scorer().score_assembly("solid electrolyte interphase growth", &assembly);
        assert_eq!(score.breakdown.token_overlap, 1.0);
        assert!((score.breakdown.search_quality - 0.6).abs() < 1e-6);
    }
}
