//! Inverted index over one Utf8 column.
//!
//! Postings are keyed by table row id and kept in ascending row id order,
//! since rows are added in scan order. Every indexed row counts as a document,
//! including rows whose text has no terms.

use crate::fts::tokenizer::tokenize;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One row's occurrences of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub row_id: u64,
    pub term_frequency: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvertedIndex {
    terms: BTreeMap<String, Vec<Posting>>,
    /// Row id -> number of terms in the row.
    doc_lengths: BTreeMap<u64, u32>,
    total_terms: u64,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, row_id: u64, text: &str) {
        let tokens = tokenize(text);
        let length = tokens.len() as u32;
        if let Some(previous) = self.doc_lengths.insert(row_id, length) {
            // Re-adding a row replaces its earlier postings.
            self.total_terms -= previous as u64;
            self.terms.retain(|_, postings| {
                postings.retain(|p| p.row_id != row_id);
                !postings.is_empty()
            });
        }
        self.total_terms += length as u64;

        let mut frequencies: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *frequencies.entry(token).or_default() += 1;
        }
        for (term, term_frequency) in frequencies {
            let postings = self.terms.entry(term).or_default();
            let at = postings.partition_point(|p| p.row_id < row_id);
            postings.insert(
                at,
                Posting {
                    row_id,
                    term_frequency,
                },
            );
        }
    }

    pub fn num_documents(&self) -> u64 {
        self.doc_lengths.len() as u64
    }

    /// Number of distinct terms.
    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn average_doc_length(&self) -> f32 {
        if self.doc_lengths.is_empty() {
            0.0
        } else {
            self.total_terms as f32 / self.doc_lengths.len() as f32
        }
    }

    pub fn doc_length(&self, row_id: u64) -> Option<u32> {
        self.doc_lengths.get(&row_id).copied()
    }

    /// Postings of `term`, ascending by row id. Empty for unknown terms.
    pub fn postings(&self, term: &str) -> &[Posting] {
        self.terms.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of indexed rows containing `term`.
    pub fn document_frequency(&self, term: &str) -> u64 {
        self.postings(term).len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_frequencies_and_lengths() {
        let mut idx = InvertedIndex::new();
        idx.add_document(3, "hello hello world");
        idx.add_document(7, "hello rust");
        assert_eq!(idx.num_documents(), 2);
        assert_eq!(idx.num_terms(), 3);
        assert_eq!(
            idx.postings("hello"),
            &[
                Posting {
                    row_id: 3,
                    term_frequency: 2
                },
                Posting {
                    row_id: 7,
                    term_frequency: 1
                }
            ]
        );
        assert_eq!(idx.doc_length(3), Some(3));
        assert_eq!(idx.average_doc_length(), 2.5);
        assert!(idx.postings("missing").is_empty());
    }

    #[test]
    fn test_empty_text_still_counts_as_document() {
        let mut idx = InvertedIndex::new();
        idx.add_document(0, "");
        idx.add_document(1, "the of and");
        assert_eq!(idx.num_documents(), 2);
        assert_eq!(idx.num_terms(), 0);
        assert_eq!(idx.average_doc_length(), 0.0);
    }

    #[test]
    fn test_readding_row_replaces_postings() {
        let mut idx = InvertedIndex::new();
        idx.add_document(1, "old words");
        idx.add_document(1, "new");
        assert_eq!(idx.num_documents(), 1);
        assert!(idx.postings("old").is_empty());
        assert_eq!(idx.document_frequency("new"), 1);
        assert_eq!(idx.average_doc_length(), 1.0);
    }
}
