//! Small text helpers shared by fusion, turn classification and provenance

use regex_lite::Regex;
use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "did", "do", "does", "for",
    "from", "had", "has", "have", "how", "i", "in", "is", "it", "its", "me", "more", "of", "on",
    "or", "tell", "than", "that", "the", "their", "them", "there", "these", "they", "this",
    "those", "to", "was", "were", "what", "when", "where", "which", "who", "why", "will", "with",
    "you",
];

/// Compile a built-in pattern.
///
/// Only called with string literals, so a failure is a programming error.
pub(crate) fn compile_pattern(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(e) => panic!("invalid built-in pattern {pattern:?}: {e}"),
    }
}

/// Lowercased alphanumeric words in order of appearance
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Distinct lowercased words
pub fn word_set(text: &str) -> HashSet<String> {
    words(text).into_iter().collect()
}

/// Distinct content words: stop words and one-letter tokens removed
pub fn content_words(text: &str) -> HashSet<String> {
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() > 1 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Jaccard similarity of two word sets. Two empty sets score 0.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_split_punctuation() {
        assert_eq!(words("Solid-state, Li-ion!"), vec!["solid", "state", "li", "ion"]);
    }

    #[test]
    fn test_jaccard() {
        let a = word_set("the quick brown fox");
        let b = word_set("the quick brown dog");
        assert!((jaccard(&a, &b) - 0.6).abs() < 1e-6);
        assert_eq!(jaccard(&a, &a), 1.0);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
    }

    #[test]
    fn test_compile_pattern() {
        let regex = compile_pattern(r"(?i)\bpatent\b");
        assert!(regex.is_match("Patent US11234567"));
    }

    #[test]
    #[should_panic(expected = "invalid built-in pattern")]
    fn test_compile_pattern_rejects_invalid() {
        compile_pattern("(unclosed");
    }

    #[test]
    fn test_content_words_drop_stop_words() {
        let set = content_words("What about its claims?");
        assert_eq!(set.len(), 1);
        assert!(set.contains("claims"));
    }
}
