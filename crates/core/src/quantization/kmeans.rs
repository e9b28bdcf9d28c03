//! Seeded k-means clustering shared by IVF partition training and PQ codebooks.
//!
//! Initialization is k-means++ driven by a `StdRng` seeded from the caller, so a
//! fixed seed over fixed input always yields the same centroids. Lloyd
//! iterations stop early once no point changes cluster.

use crate::distance::l2_sq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Parameters for a single k-means run.
#[derive(Debug, Clone, Copy)]
pub struct KMeansParams {
    /// Requested number of clusters. The result may hold fewer (see [`KMeans::k`]).
    pub k: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

/// Trained centroids, flat `k × dim`.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub centroids: Vec<f32>,
    pub dim: usize,
    /// Effective number of centroids: `min(requested k, distinct points)`.
    pub k: usize,
    /// Lloyd iterations actually performed.
    pub iterations: usize,
}

impl KMeans {
    #[inline]
    pub fn centroid(&self, i: usize) -> &[f32] {
        &self.centroids[i * self.dim..(i + 1) * self.dim]
    }
}

/// Index and squared distance of the centroid nearest to `point`.
///
/// Ties resolve to the lowest centroid index.
#[inline]
pub fn nearest(point: &[f32], centroids: &[f32], dim: usize) -> (usize, f32) {
    let k = centroids.len() / dim;
    let mut best = 0usize;
    let mut best_dist = f32::MAX;
    for ci in 0..k {
        let d = l2_sq(point, &centroids[ci * dim..(ci + 1) * dim]);
        if d < best_dist {
            best_dist = d;
            best = ci;
        }
    }
    (best, best_dist)
}

/// Cluster `data` (a contiguous arena of `n × dim` floats) with L2 k-means.
///
/// Never fails: an empty input yields zero centroids, and fewer distinct points
/// than `params.k` caps the number of centroids at the distinct count.
pub fn train(data: &[f32], dim: usize, params: &KMeansParams) -> KMeans {
    let n = if dim == 0 { 0 } else { data.len() / dim };
    if n == 0 || params.k == 0 {
        return KMeans {
            centroids: Vec::new(),
            dim,
            k: 0,
            iterations: 0,
        };
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut centroids = init_plus_plus(data, dim, n, params.k, &mut rng);
    let k = centroids.len() / dim;

    let mut assignments = vec![usize::MAX; n];
    let mut iterations = 0;
    for _ in 0..params.max_iterations {
        iterations += 1;
        let mut changed = false;
        for i in 0..n {
            let point = &data[i * dim..(i + 1) * dim];
            let (best, _) = nearest(point, &centroids, dim);
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![0.0f64; k * dim];
        let mut counts = vec![0usize; k];
        for i in 0..n {
            let ci = assignments[i];
            counts[ci] += 1;
            let point = &data[i * dim..(i + 1) * dim];
            let s = &mut sums[ci * dim..(ci + 1) * dim];
            for d in 0..dim {
                s[d] += point[d] as f64;
            }
        }
        // Empty clusters keep their previous centroid.
        for ci in 0..k {
            if counts[ci] > 0 {
                let inv = 1.0 / counts[ci] as f64;
                for d in 0..dim {
                    centroids[ci * dim + d] = (sums[ci * dim + d] * inv) as f32;
                }
            }
        }
    }

    KMeans {
        centroids,
        dim,
        k,
        iterations,
    }
}

/// k-means++ seeding. Stops early once every point coincides with a chosen
/// centroid, which bounds the result by the number of distinct points.
fn init_plus_plus(data: &[f32], dim: usize, n: usize, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let mut centroids = Vec::with_capacity(k.min(n) * dim);
    let first = rng.random_range(0..n);
    centroids.extend_from_slice(&data[first * dim..(first + 1) * dim]);

    let mut min_dists = vec![f32::MAX; n];
    for ci in 1..k {
        let last = &centroids[(ci - 1) * dim..ci * dim];
        let mut total = 0.0f64;
        for i in 0..n {
            let d = l2_sq(&data[i * dim..(i + 1) * dim], last);
            if d < min_dists[i] {
                min_dists[i] = d;
            }
            total += min_dists[i] as f64;
        }

        if total <= 0.0 {
            break;
        }

        let threshold = rng.random::<f64>() * total;
        let mut cumulative = 0.0f64;
        let mut chosen = None;
        for (i, &d) in min_dists.iter().enumerate() {
            if d <= 0.0 {
                continue;
            }
            cumulative += d as f64;
            if cumulative >= threshold {
                chosen = Some(i);
                break;
            }
        }
        // Rounding can leave the threshold just past the last positive weight.
        let chosen = match chosen.or_else(|| min_dists.iter().rposition(|&d| d > 0.0)) {
            Some(i) => i,
            None => break,
        };
        centroids.extend_from_slice(&data[chosen * dim..(chosen + 1) * dim]);
    }
    centroids
}
