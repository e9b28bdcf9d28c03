//! Vector quantization: seeded k-means and product quantization codebooks.

/// Seeded k-means++ / Lloyd clustering shared by PQ and IVF training.
pub mod kmeans;
/// Product quantization: codebook training, encoding, and lookup-table distances.
pub mod pq;

pub use pq::{approx_distance, PqCodebook, PqDistanceTable};
