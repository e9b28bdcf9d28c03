//! Product Quantization (PQ) for compact codes and fast approximate distances.
//!
//! Splits vectors into M contiguous sub-vectors and learns `2^num_bits`
//! centroids per sub-space via k-means. Each vector is encoded as M bytes (one
//! centroid id per sub-space). Distance computation uses a per-query lookup
//! table: M table lookups + M additions instead of D multiply-adds, and the
//! decoded vector is never materialized.
//!
//! Cosine codebooks are trained on unit-normalized vectors; callers normalize
//! both the stored vectors and the query before encoding / building tables.

use crate::config;
use crate::distance::{dot, l2_sq, MetricType};
use crate::error::{Error, Result};
use crate::quantization::kmeans::{self, KMeansParams};
use serde::{Deserialize, Serialize};

/// PQ codebook: M sub-spaces × K centroids × sub_dim floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PqCodebook {
    pub dim: usize,
    pub num_sub_vectors: usize,
    pub num_bits: u8,
    pub sub_dim: usize,
    /// Centroids per sub-space, always `2^num_bits`.
    pub num_centroids: usize,
    /// Flat centroid array: `centroids[m * K * sub_dim + k * sub_dim .. + sub_dim]`.
    pub centroids: Vec<f32>,
}

/// Precomputed partial distances for one query: `[M][K]`.
#[derive(Debug, Clone)]
pub struct PqDistanceTable {
    table: Vec<f32>,
    num_sub_vectors: usize,
    num_centroids: usize,
}

/// Check the `(dim, num_sub_vectors, num_bits)` triple before any training.
pub fn validate_params(dim: usize, num_sub_vectors: usize, num_bits: u8) -> Result<()> {
    if num_sub_vectors == 0 {
        return Err(Error::config("num_sub_vectors must be positive"));
    }
    if dim == 0 || !dim.is_multiple_of(num_sub_vectors) {
        return Err(Error::config(format!(
            "num_sub_vectors ({num_sub_vectors}) must evenly divide the vector dimension ({dim})"
        )));
    }
    if !(config::MIN_NUM_BITS..=config::MAX_NUM_BITS).contains(&num_bits) {
        return Err(Error::config(format!(
            "num_bits must be in {}..={}, got {num_bits}",
            config::MIN_NUM_BITS,
            config::MAX_NUM_BITS
        )));
    }
    Ok(())
}

impl PqCodebook {
    /// Train a codebook on a contiguous arena of `n × dim` floats.
    ///
    /// Sub-spaces with fewer distinct sample points than `2^num_bits` fill the
    /// remaining slots with copies of an existing centroid; since nearest-centroid
    /// search prefers the lowest index, the copies are never selected.
    pub fn train(
        vectors: &[f32],
        dim: usize,
        num_sub_vectors: usize,
        num_bits: u8,
        max_iterations: usize,
        seed: u64,
    ) -> Result<Self> {
        validate_params(dim, num_sub_vectors, num_bits)?;
        let sub_dim = dim / num_sub_vectors;
        let k = 1usize << num_bits;
        let n = vectors.len() / dim;

        let mut centroids = vec![0.0f32; num_sub_vectors * k * sub_dim];
        let mut sub_vectors = vec![0.0f32; n * sub_dim];

        for sub in 0..num_sub_vectors {
            for i in 0..n {
                let src = i * dim + sub * sub_dim;
                sub_vectors[i * sub_dim..(i + 1) * sub_dim]
                    .copy_from_slice(&vectors[src..src + sub_dim]);
            }

            let params = KMeansParams {
                k,
                max_iterations,
                seed: seed.wrapping_add(sub as u64),
            };
            let trained = kmeans::train(&sub_vectors, sub_dim, &params);

            let out = &mut centroids[sub * k * sub_dim..(sub + 1) * k * sub_dim];
            let copy_len = trained.k * sub_dim;
            out[..copy_len].copy_from_slice(&trained.centroids[..copy_len]);
            if trained.k > 0 {
                for ci in trained.k..k {
                    out.copy_within(0..sub_dim, ci * sub_dim);
                }
            }
        }

        Ok(Self {
            dim,
            num_sub_vectors,
            num_bits,
            sub_dim,
            num_centroids: k,
            centroids,
        })
    }

    #[inline]
    fn centroid(&self, sub: usize, ci: usize) -> &[f32] {
        let start = (sub * self.num_centroids + ci) * self.sub_dim;
        &self.centroids[start..start + self.sub_dim]
    }

    /// Encode one vector into M codes.
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        let mut codes = Vec::with_capacity(self.num_sub_vectors);
        self.encode_into(vector, &mut codes);
        codes
    }

    /// Encode one vector, appending its M codes to `out`.
    pub fn encode_into(&self, vector: &[f32], out: &mut Vec<u8>) {
        for sub in 0..self.num_sub_vectors {
            let sub_vec = &vector[sub * self.sub_dim..(sub + 1) * self.sub_dim];
            out.push(self.find_nearest_centroid(sub, sub_vec));
        }
    }

    /// Reconstruct the approximate vector for a code. Used for inspection only;
    /// distance computation goes through [`PqDistanceTable`].
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dim);
        for (sub, &code) in codes.iter().enumerate().take(self.num_sub_vectors) {
            out.extend_from_slice(self.centroid(sub, code as usize));
        }
        out
    }

    /// Build the `[M][K]` lookup table for a query.
    ///
    /// For cosine the query must already be unit-normalized; the table then
    /// holds half squared-L2 partials, whose sum equals `1 - cos` for unit vectors.
    pub fn distance_table(&self, query: &[f32], metric: MetricType) -> PqDistanceTable {
        let k = self.num_centroids;
        let mut table = vec![0.0f32; self.num_sub_vectors * k];

        for sub in 0..self.num_sub_vectors {
            let q_sub = &query[sub * self.sub_dim..(sub + 1) * self.sub_dim];
            for ci in 0..k {
                let centroid = self.centroid(sub, ci);
                table[sub * k + ci] = match metric {
                    MetricType::L2 => l2_sq(q_sub, centroid),
                    MetricType::Cosine => 0.5 * l2_sq(q_sub, centroid),
                    MetricType::Dot => -dot(q_sub, centroid),
                };
            }
        }

        PqDistanceTable {
            table,
            num_sub_vectors: self.num_sub_vectors,
            num_centroids: k,
        }
    }

    #[inline]
    fn find_nearest_centroid(&self, sub: usize, sub_vec: &[f32]) -> u8 {
        let mut best_idx = 0usize;
        let mut best_dist = f32::MAX;
        for ci in 0..self.num_centroids {
            let d = l2_sq(sub_vec, self.centroid(sub, ci));
            if d < best_dist {
                best_dist = d;
                best_idx = ci;
            }
        }
        best_idx as u8
    }
}

impl PqDistanceTable {
    /// Approximate distance of a PQ-encoded vector (M bytes) to the query.
    #[inline]
    pub fn distance(&self, codes: &[u8]) -> f32 {
        let k = self.num_centroids;
        codes
            .iter()
            .take(self.num_sub_vectors)
            .enumerate()
            .map(|(m, &c)| self.table[m * k + c as usize])
            .sum()
    }
}

/// One-shot approximate distance. Builds a table per call, so hot loops should
/// build a [`PqDistanceTable`] once and reuse it.
pub fn approx_distance(codes: &[u8], query: &[f32], codebook: &PqCodebook, metric: MetricType) -> f32 {
    codebook.distance_table(query, metric).distance(codes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n * dim).map(|_| rng.random::<f32>() - 0.5).collect()
    }

    #[test]
    fn test_rejects_non_dividing_sub_vectors() {
        let data = random_vectors(10, 6, 1);
        let err = PqCodebook::train(&data, 6, 4, 8, 10, 1).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_num_bits_out_of_range() {
        let data = random_vectors(10, 4, 1);
        assert!(PqCodebook::train(&data, 4, 2, 0, 10, 1).is_err());
        assert!(PqCodebook::train(&data, 4, 2, 9, 10, 1).is_err());
    }

    #[test]
    fn test_encode_length_and_range() {
        let data = random_vectors(200, 8, 2);
        let cb = PqCodebook::train(&data, 8, 4, 4, 10, 2).unwrap();
        let codes = cb.encode(&data[..8]);
        assert_eq!(codes.len(), 4);
        assert!(codes.iter().all(|&c| (c as usize) < 16));
    }

    #[test]
    fn test_table_distance_matches_decoded_l2() {
        let data = random_vectors(300, 8, 3);
        let cb = PqCodebook::train(&data, 8, 2, 6, 15, 3).unwrap();
        let query = &data[8..16];
        let codes = cb.encode(&data[..8]);
        let decoded = cb.decode(&codes);
        let via_table = approx_distance(&codes, query, &cb, MetricType::L2);
        let direct = MetricType::L2.distance(query, &decoded);
        assert!((via_table - direct).abs() < 1e-4);
    }

    #[test]
    fn test_dot_table_matches_decoded() {
        let data = random_vectors(300, 8, 4);
        let cb = PqCodebook::train(&data, 8, 4, 5, 15, 4).unwrap();
        let query = &data[16..24];
        let codes = cb.encode(&data[..8]);
        let decoded = cb.decode(&codes);
        let via_table = approx_distance(&codes, query, &cb, MetricType::Dot);
        assert!((via_table - MetricType::Dot.distance(query, &decoded)).abs() < 1e-4);
    }

    #[test]
    fn test_few_samples_never_pick_padding() {
        // Two points, 256 slots: padded slots duplicate slot 0 and are never chosen.
        let data = vec![0.0, 0.0, 5.0, 5.0];
        let cb = PqCodebook::train(&data, 2, 1, 8, 10, 5).unwrap();
        assert!(cb.encode(&[0.0, 0.0])[0] < 2);
        assert!(cb.encode(&[5.0, 5.0])[0] < 2);
    }

    #[test]
    fn test_top1_agrees_with_exact_on_separated_clusters() {
        let mut data = Vec::new();
        let centers = [[0.0f32, 0.0, 0.0, 0.0], [8.0, 8.0, 0.0, 0.0], [0.0, 0.0, 8.0, 8.0]];
        let mut rng = StdRng::seed_from_u64(11);
        for i in 0..150 {
            let c = centers[i % 3];
            for &x in &c {
                data.push(x + rng.random::<f32>() * 0.1);
            }
        }
        let cb = PqCodebook::train(&data, 4, 2, 4, 20, 11).unwrap();
        let codes: Vec<Vec<u8>> = data.chunks(4).map(|v| cb.encode(v)).collect();
        for query in centers.iter() {
            let table = cb.distance_table(query, MetricType::L2);
            let approx_best = (0..codes.len())
                .min_by(|&a, &b| table.distance(&codes[a]).total_cmp(&table.distance(&codes[b])))
                .unwrap();
            let exact_best = (0..codes.len())
                .min_by(|&a, &b| {
                    let da = MetricType::L2.distance(query, &data[a * 4..a * 4 + 4]);
                    let db = MetricType::L2.distance(query, &data[b * 4..b * 4 + 4]);
                    da.total_cmp(&db)
                })
                .unwrap();
            assert_eq!(approx_best % 3, exact_best % 3, "top-1 must land in the same cluster");
        }
    }
}
