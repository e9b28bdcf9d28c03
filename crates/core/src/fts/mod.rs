//! Full-text search over Utf8 columns.
//!
//! - [`tokenizer`]: lowercased alphanumeric terms without stop words
//! - [`inverted_index`]: term -> postings of `(row id, term frequency)`
//! - [`scorer`]: BM25 relevance against an inverted index

pub mod inverted_index;
pub mod scorer;
pub mod tokenizer;

pub use inverted_index::{InvertedIndex, Posting};
pub use tokenizer::{query_terms, tokenize};
