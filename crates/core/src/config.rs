//! Global configuration constants for lakevec.
//!
//! Index build defaults, query defaults, and input validation limits are defined
//! here. Runtime configuration is expressed through the validated builders in
//! [`crate::index::IndexDescriptor`] and [`crate::query::QuerySpec`]; these
//! constants only supply their defaults and bounds.

/// Default number of IVF partitions (coarse centroids).
///
/// Roughly `sqrt(num_rows)` is a good starting point for large tables.
pub const DEFAULT_NUM_PARTITIONS: usize = 256;

/// Default number of PQ sub-vectors. Must divide the vector dimension.
pub const DEFAULT_NUM_SUB_VECTORS: usize = 16;

/// Default bits per PQ code. Each sub-vector codebook holds `2^bits` centroids.
pub const DEFAULT_NUM_BITS: u8 = 8;

/// Smallest accepted `num_bits`.
pub const MIN_NUM_BITS: u8 = 1;

/// Largest accepted `num_bits`. Codes are stored one byte per sub-vector.
pub const MAX_NUM_BITS: u8 = 8;

/// Default upper bound on k-means iterations (IVF and PQ training).
pub const DEFAULT_MAX_ITERATIONS: usize = 50;

/// Default fraction of rows sampled for training.
pub const DEFAULT_SAMPLE_RATE: f64 = 1.0;

/// Seed for sampling and k-means initialization.
///
/// Fixed so that builds over identical data produce identical artifacts.
pub const DEFAULT_SEED: u64 = 42;

/// Default number of partitions searched per query.
pub const DEFAULT_NPROBES: usize = 20;

/// Default number of results per query.
pub const DEFAULT_LIMIT: usize = 10;

/// Default refine factor. `1.0` keeps approximate distances as final.
pub const DEFAULT_REFINE_FACTOR: f32 = 1.0;

/// Default number of rows per emitted result batch.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Rows per batch when scanning table fragments internally.
pub const SCAN_BATCH_SIZE: usize = 8192;

/// Result batches buffered between the producer task and the consumer.
///
/// Kept at one so that an abandoned stream stops the producer after at most
/// one batch of look-ahead.
pub const STREAM_CHANNEL_CAPACITY: usize = 1;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Maximum number of results (`limit`) per query.
pub const MAX_LIMIT: usize = 100_000;

/// Deepest nesting of parentheses and `NOT` accepted in a filter.
pub const MAX_FILTER_DEPTH: usize = 64;

/// Name of the distance column appended to vector query results.
pub const DISTANCE_COLUMN: &str = "_distance";

/// Name of the relevance column appended to full-text query results.
pub const SCORE_COLUMN: &str = "_score";

/// Name of the optional row id column.
pub const ROW_ID_COLUMN: &str = "_rowid";

/// Columns queries append to results; tables may not define them.
pub const RESERVED_COLUMNS: [&str; 3] = [DISTANCE_COLUMN, SCORE_COLUMN, ROW_ID_COLUMN];

/// BM25 term frequency saturation. Higher values let repeated terms keep
/// adding to the score for longer.
pub const BM25_K1: f32 = 1.2;

/// BM25 document length normalization, in `[0, 1]`. `0` ignores length.
pub const BM25_B: f32 = 0.75;

/// File extension of persisted index artifacts.
pub const INDEX_FILE_EXTENSION: &str = "lvi";

/// Version tag written into persisted index artifacts.
pub const INDEX_FORMAT_VERSION: u32 = 1;
