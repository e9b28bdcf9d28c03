//! Text tokenizer shared by index builds and queries.
//!
//! Lowercases, splits on any non-alphanumeric character, and drops
//! single-character tokens and common English stop words. Indexing and
//! querying must tokenize identically, so both go through [`tokenize`].

use std::collections::HashSet;
use std::sync::LazyLock;

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is",
        "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there",
        "these", "they", "this", "to", "was", "will", "with",
    ]
    .into_iter()
    .collect()
});

/// Terms of `text` in order of appearance, repeats included.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|piece| piece.chars().nth(1).is_some())
        .map(str::to_lowercase)
        .filter(|term| !STOP_WORDS.contains(term.as_str()))
        .collect()
}

/// Distinct terms of a search string, in order of first appearance.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_splits_on_punctuation() {
        assert_eq!(
            tokenize("Rust's borrow-checker, RUST!"),
            vec!["rust", "borrow", "checker", "rust"]
        );
    }

    #[test]
    fn test_drops_stop_words_and_single_chars() {
        assert_eq!(tokenize("the fox and a dog x"), vec!["fox", "dog"]);
        assert!(tokenize("to be or not to be").is_empty());
    }

    #[test]
    fn test_unicode_letters_are_terms() {
        assert_eq!(tokenize("Über café"), vec!["über", "café"]);
    }

    #[test]
    fn test_query_terms_deduplicated() {
        assert_eq!(query_terms("fast Fast rust fast"), vec!["fast", "rust"]);
    }
}
