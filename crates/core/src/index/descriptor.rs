//! Index descriptors: immutable build configuration produced by a validated builder.

use crate::config;
use crate::distance::MetricType;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which kind of index a descriptor builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Ordered value -> row id mapping over a scalar column.
    Scalar,
    /// Inverted file with product quantization over a vector column.
    IvfPq,
    /// Inverted term index with BM25 scoring over a Utf8 column.
    Fts,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Scalar => "SCALAR",
            IndexKind::IvfPq => "IVF_PQ",
            IndexKind::Fts => "FTS",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Training parameters of an IVF-PQ index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfPqParams {
    pub metric: MetricType,
    pub num_partitions: usize,
    pub num_sub_vectors: usize,
    pub num_bits: u8,
    pub max_iterations: usize,
    /// Fraction of rows in `(0, 1]` used to train centroids and codebooks.
    pub sample_rate: f64,
    pub seed: u64,
}

impl Default for IvfPqParams {
    fn default() -> Self {
        Self {
            metric: MetricType::L2,
            num_partitions: config::DEFAULT_NUM_PARTITIONS,
            num_sub_vectors: config::DEFAULT_NUM_SUB_VECTORS,
            num_bits: config::DEFAULT_NUM_BITS,
            max_iterations: config::DEFAULT_MAX_ITERATIONS,
            sample_rate: config::DEFAULT_SAMPLE_RATE,
            seed: config::DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexParams {
    Scalar,
    IvfPq(IvfPqParams),
    Fts,
}

/// What to build, on which column, under which name.
///
/// Constructed through [`IndexDescriptor::ivf_pq`], [`IndexDescriptor::scalar`]
/// or [`IndexDescriptor::fts`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    name: String,
    column: String,
    params: IndexParams,
    replace: bool,
}

impl IndexDescriptor {
    /// Start an IVF-PQ descriptor for a vector column.
    pub fn ivf_pq(column: impl Into<String>) -> IndexDescriptorBuilder {
        IndexDescriptorBuilder::new(column.into(), IndexKind::IvfPq)
    }

    /// Start a scalar descriptor for a scalar column.
    pub fn scalar(column: impl Into<String>) -> IndexDescriptorBuilder {
        IndexDescriptorBuilder::new(column.into(), IndexKind::Scalar)
    }

    /// Start a full-text descriptor for a Utf8 column.
    pub fn fts(column: impl Into<String>) -> IndexDescriptorBuilder {
        IndexDescriptorBuilder::new(column.into(), IndexKind::Fts)
    }

    /// Default index name for a column.
    pub fn default_name(column: &str) -> String {
        format!("{column}_idx")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn kind(&self) -> IndexKind {
        match self.params {
            IndexParams::Scalar => IndexKind::Scalar,
            IndexParams::IvfPq(_) => IndexKind::IvfPq,
            IndexParams::Fts => IndexKind::Fts,
        }
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    pub fn ivf_pq_params(&self) -> Option<&IvfPqParams> {
        match &self.params {
            IndexParams::IvfPq(p) => Some(p),
            IndexParams::Scalar | IndexParams::Fts => None,
        }
    }

    pub fn replace(&self) -> bool {
        self.replace
    }
}

/// Builder for [`IndexDescriptor`]. All checks that do not need the table
/// schema happen in [`IndexDescriptorBuilder::build`].
#[derive(Debug, Clone)]
pub struct IndexDescriptorBuilder {
    column: String,
    name: Option<String>,
    kind: IndexKind,
    ivf: IvfPqParams,
    ivf_params_set: bool,
    replace: bool,
}

impl IndexDescriptorBuilder {
    fn new(column: String, kind: IndexKind) -> Self {
        Self {
            column,
            name: None,
            kind,
            ivf: IvfPqParams::default(),
            ivf_params_set: false,
            replace: false,
        }
    }

    /// Index name. Defaults to `{column}_idx`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Supersede an existing index with the same name (or on the same column)
    /// instead of failing with a conflict.
    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    pub fn metric(mut self, metric: MetricType) -> Self {
        self.ivf.metric = metric;
        self.ivf_params_set = true;
        self
    }

    pub fn num_partitions(mut self, n: usize) -> Self {
        self.ivf.num_partitions = n;
        self.ivf_params_set = true;
        self
    }

    pub fn num_sub_vectors(mut self, n: usize) -> Self {
        self.ivf.num_sub_vectors = n;
        self.ivf_params_set = true;
        self
    }

    pub fn num_bits(mut self, bits: u8) -> Self {
        self.ivf.num_bits = bits;
        self.ivf_params_set = true;
        self
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.ivf.max_iterations = n;
        self.ivf_params_set = true;
        self
    }

    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.ivf.sample_rate = rate;
        self.ivf_params_set = true;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.ivf.seed = seed;
        self.ivf_params_set = true;
        self
    }

    pub fn build(self) -> Result<IndexDescriptor> {
        if self.column.is_empty() {
            return Err(Error::config("index target column must not be empty"));
        }
        let name = self
            .name
            .unwrap_or_else(|| IndexDescriptor::default_name(&self.column));
        if name.is_empty() {
            return Err(Error::config("index name must not be empty"));
        }
        if name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(Error::config(format!("invalid index name '{name}'")));
        }

        if self.ivf_params_set && self.kind != IndexKind::IvfPq {
            return Err(Error::config(format!(
                "IVF_PQ parameters given for {} index '{name}'",
                self.kind
            )));
        }
        let params = match self.kind {
            IndexKind::Scalar => IndexParams::Scalar,
            IndexKind::Fts => IndexParams::Fts,
            IndexKind::IvfPq => {
                validate_ivf_pq(&self.ivf)?;
                IndexParams::IvfPq(self.ivf)
            }
        };

        Ok(IndexDescriptor {
            name,
            column: self.column,
            params,
            replace: self.replace,
        })
    }
}

fn validate_ivf_pq(p: &IvfPqParams) -> Result<()> {
    if p.num_partitions == 0 {
        return Err(Error::config("num_partitions must be positive"));
    }
    if p.num_sub_vectors == 0 {
        return Err(Error::config("num_sub_vectors must be positive"));
    }
    if !(config::MIN_NUM_BITS..=config::MAX_NUM_BITS).contains(&p.num_bits) {
        return Err(Error::config(format!(
            "num_bits must be in {}..={}, got {}",
            config::MIN_NUM_BITS,
            config::MAX_NUM_BITS,
            p.num_bits
        )));
    }
    if p.max_iterations == 0 {
        return Err(Error::config("max_iterations must be positive"));
    }
    if !(p.sample_rate > 0.0 && p.sample_rate <= 1.0) {
        return Err(Error::config(format!(
            "sample_rate must be in (0, 1], got {}",
            p.sample_rate
        )));
    }
    Ok(())
}
