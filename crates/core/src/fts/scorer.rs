//! BM25 Okapi relevance.
//!
//! Scores use the corpus statistics of the inverted index (document count,
//! document frequencies, average length) with `k1` and `b` from
//! [`crate::config`]. Higher is more relevant; a row matching no query term
//! scores nothing.

use crate::config;
use crate::fts::inverted_index::InvertedIndex;
use crate::fts::tokenizer::tokenize;
use std::collections::HashMap;

/// `ln((N - df + 0.5) / (df + 0.5) + 1)`, always positive.
pub fn idf(num_documents: u64, document_frequency: u64) -> f32 {
    let n = num_documents as f32;
    let df = document_frequency as f32;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

fn term_score(idf: f32, term_frequency: f32, doc_length: f32, average_length: f32) -> f32 {
    let (k1, b) = (config::BM25_K1, config::BM25_B);
    let relative_length = if average_length > 0.0 {
        doc_length / average_length
    } else {
        1.0
    };
    idf * (term_frequency * (k1 + 1.0)) / (term_frequency + k1 * (1.0 - b + b * relative_length))
}

/// BM25 score of every indexed row containing at least one of `terms`.
pub fn score_indexed(index: &InvertedIndex, terms: &[String]) -> HashMap<u64, f32> {
    let n = index.num_documents();
    let average = index.average_doc_length();
    let mut scores = HashMap::new();
    for term in terms {
        let postings = index.postings(term);
        if postings.is_empty() {
            continue;
        }
        let weight = idf(n, postings.len() as u64);
        for p in postings {
            let length = index.doc_length(p.row_id).unwrap_or_default() as f32;
            *scores.entry(p.row_id).or_insert(0.0) +=
                term_score(weight, p.term_frequency as f32, length, average);
        }
    }
    scores
}

/// BM25 score of a row the index has not seen, using the index's corpus
/// statistics. `None` when the text contains none of `terms`.
pub fn score_text(index: &InvertedIndex, terms: &[String], text: &str) -> Option<f32> {
    let tokens = tokenize(text);
    let length = tokens.len() as f32;
    let mut frequencies: HashMap<&str, u32> = HashMap::new();
    for token in &tokens {
        *frequencies.entry(token.as_str()).or_default() += 1;
    }
    let n = index.num_documents();
    let average = index.average_doc_length();
    let mut score = None;
    for term in terms {
        if let Some(&tf) = frequencies.get(term.as_str()) {
            let weight = idf(n, index.document_frequency(term));
            *score.get_or_insert(0.0) += term_score(weight, tf as f32, length, average);
        }
    }
    score
}
