//! Query configuration: an immutable [`QuerySpec`] built through
//! [`QuerySpecBuilder`], which parses the filter and checks every parameter
//! that does not depend on the table schema.

use crate::config;
use crate::distance::MetricType;
use crate::error::{Error, Result};
use crate::fts::query_terms;
use crate::query::predicate::Expr;

/// A fully validated query.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub(crate) vector_column: Option<String>,
    pub(crate) vector: Option<Vec<f32>>,
    pub(crate) full_text: Option<String>,
    pub(crate) full_text_column: Option<String>,
    pub(crate) limit: usize,
    pub(crate) filter: Option<Expr>,
    pub(crate) prefilter: bool,
    pub(crate) projection: Vec<String>,
    pub(crate) refine_factor: f32,
    pub(crate) nprobes: usize,
    pub(crate) metric: Option<MetricType>,
    pub(crate) fast_search: bool,
    pub(crate) with_row_id: bool,
    pub(crate) batch_size: usize,
}

impl QuerySpec {
    pub fn builder() -> QuerySpecBuilder {
        QuerySpecBuilder::default()
    }

    pub fn vector(&self) -> Option<&[f32]> {
        self.vector.as_deref()
    }

    pub fn vector_column(&self) -> Option<&str> {
        self.vector_column.as_deref()
    }

    /// Full-text query string.
    pub fn full_text(&self) -> Option<&str> {
        self.full_text.as_deref()
    }

    pub fn full_text_column(&self) -> Option<&str> {
        self.full_text_column.as_deref()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn filter(&self) -> Option<&Expr> {
        self.filter.as_ref()
    }

    pub fn prefilter(&self) -> bool {
        self.prefilter
    }

    /// Requested columns; empty means every table column.
    pub fn projection(&self) -> &[String] {
        &self.projection
    }

    pub fn refine_factor(&self) -> f32 {
        self.refine_factor
    }

    pub fn nprobes(&self) -> usize {
        self.nprobes
    }

    pub fn metric(&self) -> Option<MetricType> {
        self.metric
    }

    pub fn fast_search(&self) -> bool {
        self.fast_search
    }

    pub fn with_row_id(&self) -> bool {
        self.with_row_id
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Size of the candidate pool kept before refinement: `ceil(limit * refine_factor)`.
    pub fn pool_size(&self) -> usize {
        ((self.limit as f64) * self.refine_factor as f64).ceil() as usize
    }
}

#[derive(Debug, Clone)]
enum FilterInput {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct QuerySpecBuilder {
    vector_column: Option<String>,
    vector: Option<Vec<f32>>,
    full_text: Option<String>,
    full_text_column: Option<String>,
    limit: usize,
    filter: Option<FilterInput>,
    prefilter: bool,
    projection: Vec<String>,
    refine_factor: f32,
    nprobes: usize,
    metric: Option<MetricType>,
    fast_search: bool,
    with_row_id: bool,
    batch_size: usize,
}

impl Default for QuerySpecBuilder {
    fn default() -> Self {
        Self {
            vector_column: None,
            vector: None,
            full_text: None,
            full_text_column: None,
            limit: config::DEFAULT_LIMIT,
            filter: None,
            prefilter: true,
            projection: Vec::new(),
            refine_factor: config::DEFAULT_REFINE_FACTOR,
            nprobes: config::DEFAULT_NPROBES,
            metric: None,
            fast_search: false,
            with_row_id: false,
            batch_size: config::DEFAULT_BATCH_SIZE,
        }
    }
}

impl QuerySpecBuilder {
    /// Query vector for nearest-neighbor search.
    pub fn nearest_to(mut self, vector: impl Into<Vec<f32>>) -> Self {
        self.vector = Some(vector.into());
        self
    }

    /// Vector column to search. Optional when the table has exactly one.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.vector_column = Some(column.into());
        self
    }

    /// Rank rows by BM25 relevance to `query` using a full-text index.
    /// Cannot be combined with [`nearest_to`](Self::nearest_to).
    pub fn full_text(mut self, query: impl Into<String>) -> Self {
        self.full_text = Some(query.into());
        self
    }

    /// Text column to search. Optional when the table has exactly one
    /// full-text index.
    pub fn full_text_column(mut self, column: impl Into<String>) -> Self {
        self.full_text_column = Some(column.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// SQL-like filter, parsed by `build`.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(FilterInput::Text(filter.into()));
        self
    }

    /// An already parsed filter expression.
    pub fn filter_expr(mut self, expr: Expr) -> Self {
        self.filter = Some(FilterInput::Expr(expr));
        self
    }

    /// Apply the filter before the vector search (`true`, default) or drop
    /// failing rows after ranking (`false`).
    pub fn prefilter(mut self, prefilter: bool) -> Self {
        self.prefilter = prefilter;
        self
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn refine_factor(mut self, factor: f32) -> Self {
        self.refine_factor = factor;
        self
    }

    pub fn nprobes(mut self, nprobes: usize) -> Self {
        self.nprobes = nprobes;
        self
    }

    /// Distance metric. Defaults to the metric of the index being searched, or
    /// L2 without an index.
    pub fn metric(mut self, metric: MetricType) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Search only indexed rows, skipping the flat scan over rows written after
    /// the index was built.
    pub fn fast_search(mut self, fast_search: bool) -> Self {
        self.fast_search = fast_search;
        self
    }

    pub fn with_row_id(mut self, with_row_id: bool) -> Self {
        self.with_row_id = with_row_id;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn build(self) -> Result<QuerySpec> {
        if self.limit == 0 {
            return Err(Error::config("limit must be positive"));
        }
        if self.limit > config::MAX_LIMIT {
            return Err(Error::config(format!(
                "limit {} exceeds maximum of {}",
                self.limit,
                config::MAX_LIMIT
            )));
        }
        if self.nprobes == 0 {
            return Err(Error::config("nprobes must be positive"));
        }
        if !self.refine_factor.is_finite() || self.refine_factor < 1.0 {
            return Err(Error::config(format!(
                "refine_factor must be >= 1, got {}",
                self.refine_factor
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be positive"));
        }
        if let Some(v) = &self.vector {
            if v.is_empty() {
                return Err(Error::config("query vector must not be empty"));
            }
            if v.len() > config::MAX_DIMENSION {
                return Err(Error::config(format!(
                    "query vector dimension {} exceeds maximum of {}",
                    v.len(),
                    config::MAX_DIMENSION
                )));
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(Error::config("query vector contains NaN or Inf"));
            }
        } else if let Some(col) = &self.vector_column {
            return Err(Error::config(format!(
                "vector column '{col}' given without a query vector"
            )));
        }
        match &self.full_text {
            Some(_) if self.vector.is_some() => {
                return Err(Error::config(
                    "a query is either a vector search or a full-text search, not both",
                ));
            }
            Some(q) if query_terms(q).is_empty() => {
                return Err(Error::config(format!(
                    "full-text query '{q}' has no searchable terms"
                )));
            }
            None if self.full_text_column.is_some() => {
                return Err(Error::config(
                    "full-text column given without a full-text query",
                ));
            }
            _ => {}
        }
        let filter = match self.filter {
            None => None,
            Some(FilterInput::Expr(e)) => Some(e),
            Some(FilterInput::Text(t)) => Some(Expr::parse(&t)?),
        };

        Ok(QuerySpec {
            vector_column: self.vector_column,
            vector: self.vector,
            full_text: self.full_text,
            full_text_column: self.full_text_column,
            limit: self.limit,
            filter,
            prefilter: self.prefilter,
            projection: self.projection,
            refine_factor: self.refine_factor,
            nprobes: self.nprobes,
            metric: self.metric,
            fast_search: self.fast_search,
            with_row_id: self.with_row_id,
            batch_size: self.batch_size,
        })
    }
}
