//! Distance metrics for exact vector comparison.
//!
//! All metrics return a distance where **lower is closer**, so a single
//! ascending ordering ranks results for every metric.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Distance metric used to build an index and rank query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MetricType {
    /// Squared Euclidean distance (sum of squared differences). Range: \[0, ∞).
    #[default]
    L2,
    /// Cosine distance: `1 - cosine_similarity`. Range: \[0, 2\].
    Cosine,
    /// Negative dot product: `-dot(a, b)`.
    Dot,
}

impl MetricType {
    /// Exact f32-vs-f32 distance.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            MetricType::L2 => l2_sq(a, b),
            MetricType::Cosine => 1.0 - cosine_similarity(a, b),
            MetricType::Dot => -dot(a, b),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::L2 => "l2",
            MetricType::Cosine => "cosine",
            MetricType::Dot => "dot",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(MetricType::L2),
            "cosine" => Ok(MetricType::Cosine),
            "dot" | "dot_product" => Ok(MetricType::Dot),
            other => Err(Error::config(format!("unknown metric type '{other}'"))),
        }
    }
}

/// Squared Euclidean distance. Unrolled by 4 so the compiler can vectorize.
#[inline]
pub fn l2_sq(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let chunks = a.len() / 4;
    let mut acc = [0.0f32; 4];
    for c in 0..chunks {
        let i = c * 4;
        for j in 0..4 {
            let d = a[i + j] - b[i + j];
            acc[j] += d * d;
        }
    }
    let mut sum = acc[0] + acc[1] + acc[2] + acc[3];
    for i in chunks * 4..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum
}

/// Dot product. Unrolled by 4 so the compiler can vectorize.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let chunks = a.len() / 4;
    let mut acc = [0.0f32; 4];
    for c in 0..chunks {
        let i = c * 4;
        for j in 0..4 {
            acc[j] += a[i + j] * b[i + j];
        }
    }
    let mut sum = acc[0] + acc[1] + acc[2] + acc[3];
    for i in chunks * 4..a.len() {
        sum += a[i] * b[i];
    }
    sum
}

/// Cosine similarity. Zero-norm inputs are treated as orthogonal to everything.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let denom = norm(a) * norm(b);
    if denom < 1e-10 {
        return 0.0;
    }
    dot(a, b) / denom
}

#[inline]
pub fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize_in_place(v: &mut [f32]) {
    let n = norm(v);
    if n > 1e-10 {
        let inv = 1.0 / n;
        for x in v.iter_mut() {
            *x *= inv;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_matches_naive() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [0.0, 2.0, 5.0, 4.0, 8.0];
        assert!((MetricType::L2.distance(&a, &b) - 14.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_and_identical() {
        let a = [1.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0];
        assert!((MetricType::Cosine.distance(&a, &b) - 1.0).abs() < 1e-6);
        assert!(MetricType::Cosine.distance(&a, &a).abs() < 1e-6);
    }

    #[test]
    fn test_dot_is_negated() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        assert!((MetricType::Dot.distance(&a, &b) + 32.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_cosine() {
        let z = [0.0, 0.0];
        let a = [1.0, 1.0];
        assert!((MetricType::Cosine.distance(&z, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize_in_place(&mut v);
        assert!((norm(&v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse_metric() {
        assert_eq!("L2".parse::<MetricType>().unwrap(), MetricType::L2);
        assert_eq!("cosine".parse::<MetricType>().unwrap(), MetricType::Cosine);
        assert_eq!("dot".parse::<MetricType>().unwrap(), MetricType::Dot);
        assert!("hamming".parse::<MetricType>().is_err());
    }
}
