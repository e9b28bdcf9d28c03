//! Coarse IVF partitioning.
//!
//! Centroids are trained once per index build with seeded k-means and used both
//! to assign every row to a posting list and to rank posting lists per query.

use crate::distance::MetricType;
use crate::quantization::kmeans::{self, KMeansParams};
use serde::{Deserialize, Serialize};

/// Trained coarse centroids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfCentroids {
    pub dim: usize,
    pub metric: MetricType,
    /// Flat `num_partitions × dim` array, in insertion (training) order.
    pub centroids: Vec<f32>,
}

impl IvfCentroids {
    /// Train `num_partitions` centroids over a contiguous sample arena.
    ///
    /// When the sample holds fewer distinct vectors than requested, the
    /// effective partition count is capped instead of failing.
    pub fn train(
        sample: &[f32],
        dim: usize,
        num_partitions: usize,
        max_iterations: usize,
        metric: MetricType,
        seed: u64,
    ) -> Self {
        let params = KMeansParams {
            k: num_partitions,
            max_iterations,
            seed,
        };
        let trained = kmeans::train(sample, dim, &params);
        if trained.k < num_partitions {
            tracing::debug!(
                "Capped IVF partitions from {} to {} (distinct training vectors)",
                num_partitions,
                trained.k
            );
        }
        Self {
            dim,
            metric,
            centroids: trained.centroids,
        }
    }

    pub fn num_partitions(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.centroids.len() / self.dim
        }
    }

    pub fn centroid(&self, partition: usize) -> &[f32] {
        &self.centroids[partition * self.dim..(partition + 1) * self.dim]
    }

    /// Partition whose centroid is closest to `vector` under the index metric.
    ///
    /// Ties resolve to the earliest centroid. Must not be called on an empty model.
    pub fn assign(&self, vector: &[f32]) -> u32 {
        let mut best = 0usize;
        let mut best_dist = f32::MAX;
        for p in 0..self.num_partitions() {
            let d = self.metric.distance(vector, self.centroid(p));
            if d < best_dist {
                best_dist = d;
                best = p;
            }
        }
        best as u32
    }

    /// The `nprobes` partitions closest to `query`, nearest first.
    ///
    /// The sort is stable, so equal distances keep centroid insertion order.
    pub fn rank(&self, query: &[f32], nprobes: usize) -> Vec<u32> {
        let mut distances: Vec<(u32, f32)> = (0..self.num_partitions())
            .map(|p| (p as u32, self.metric.distance(query, self.centroid(p))))
            .collect();
        distances.sort_by(|a, b| a.1.total_cmp(&b.1));
        distances.truncate(nprobes);
        distances.into_iter().map(|(p, _)| p).collect()
    }
}
