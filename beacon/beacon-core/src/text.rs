//! Text normalization and token helpers shared by the pipeline stages.

use std::collections::{BTreeSet, HashSet};
use unicode_segmentation::UnicodeSegmentation;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "should", "could", "may", "might", "can", "this", "that",
    "these", "those", "what", "which", "who", "when", "where", "why", "how", "i", "my", "me",
];

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Lowercase and collapse all whitespace runs to single spaces.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased unicode words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

/// Content-bearing terms in first-occurrence order, without duplicates.
pub fn keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|word| !is_stop_word(word) && word.chars().count() > 1)
        .filter(|word| seen.insert(word.clone()))
        .collect()
}

/// Jaccard similarity over lowercased word sets.
///
/// Texts without any words only match when they are identical.
pub fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let words_a: BTreeSet<String> = tokenize(a).into_iter().collect();
    let words_b: BTreeSet<String> = tokenize(b).into_iter().collect();

    if words_a.is_empty() || words_b.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f32 / union as f32
}

/// Sentences of `text` with whitespace collapsed, in order.
pub fn sentences(text: &str) -> Vec<String> {
    text.unicode_sentences()
        .map(|sentence| sentence.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|sentence| !sentence.is_empty())
        .collect()
}

/// Truncate to at most `max_chars` characters, appending an ellipsis when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  How   to  Install\tHNSW \n"), "how to install hnsw");
    }

    #[test]
    fn test_keywords_drop_stop_words() {
        let words = keywords("How to install the vector database on the server");
        assert_eq!(words, vec!["install", "vector", "database", "server"]);
    }

    #[test]
    fn test_keywords_dedupe() {
        assert_eq!(keywords("index index Index"), vec!["index"]);
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard_similarity("hello world", "world hello"), 1.0);
        assert_eq!(jaccard_similarity("", ""), 1.0);
        assert_eq!(jaccard_similarity("alpha", "beta"), 0.0);
    }

    #[test]
    fn test_jaccard_without_words() {
        assert_eq!(jaccard_similarity("---", "***"), 0.0);
        assert_eq!(jaccard_similarity("---", "---"), 1.0);
        assert_eq!(jaccard_similarity("", "words here"), 0.0);
    }

    #[test]
    fn test_jaccard_partial() {
        let partial = jaccard_similarity("hello world", "goodbye world");
        assert!(partial > 0.0 && partial < 1.0);
    }

    #[test]
    fn test_sentences() {
        let split = sentences("First  sentence here.\nSecond one!   Third?");
        assert_eq!(split, vec!["First sentence here.", "Second one!", "Third?"]);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdefghij", 5), "abcd…");
        assert_eq!(truncate_chars("héllo wörld", 4), "hél…");
    }
}
