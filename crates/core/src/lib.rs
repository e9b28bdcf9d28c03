//! # lakevec-core
//!
//! Embeddable columnar vector store core: IVF-PQ, scalar and full-text indexes
//! over in-memory tables, and hybrid queries combining nearest-neighbor or
//! BM25 search with SQL-like predicate filtering.
//!
//! This is the core library crate with zero async dependencies. Index builds
//! and query executions are plain blocking calls and iterators; the
//! `lakevec-engine` crate schedules them on a worker pool and exposes results
//! as an async stream.

/// Global configuration constants: defaults, limits, and reserved names.
pub mod config;
/// Distance metrics (L2, cosine, dot) where lower is always closer.
pub mod distance;
/// Error taxonomy: config, conflict, data, not found.
pub mod error;
/// Tokenizer, inverted index and BM25 scoring for full-text search.
pub mod fts;
/// Index descriptors, IVF-PQ, scalar and full-text artifacts, builder, store,
/// persistence.
pub mod index;
/// Coarse IVF partitioning over k-means centroids.
pub mod ivf;
/// Seeded k-means and product quantization.
pub mod quantization;
/// Filter expressions, query specs, planning, and execution.
pub mod query;
/// Schemas, record batches, and the in-memory table.
pub mod table;

pub use distance::MetricType;
pub use error::{Error, Result};
pub use index::{IndexBuilder, IndexDescriptor, IndexKind, IndexStore};
pub use query::{QueryExecution, QueryPlan, QuerySpec};
pub use table::{ColumnData, DataSource, DataType, Field, MemTable, RecordBatch, Schema};
