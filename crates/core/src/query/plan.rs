//! Query planning: every schema-dependent check happens here, before any row
//! is read, and the search path is fixed for the lifetime of the execution.

use crate::config;
use crate::distance::MetricType;
use crate::error::{Error, Result};
use crate::fts::query_terms;
use crate::index::{IndexArtifact, IndexKind, IndexStore};
use crate::query::executor::QueryExecution;
use crate::query::predicate::Predicate;
use crate::query::request::QuerySpec;
use crate::table::schema::{DataType, Field, Schema};
use crate::table::source::DataSource;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How candidate rows are produced.
#[derive(Debug, Clone)]
pub enum SearchPath {
    /// Search an IVF-PQ index, plus a flat scan of rows it does not cover.
    Indexed(Arc<IndexArtifact>),
    /// Exact distances against every row.
    BruteForce,
    /// BM25 ranking from a full-text index, plus on-the-fly scoring of rows
    /// it does not cover.
    FullText(Arc<IndexArtifact>),
    /// No query vector: filtered rows in row-id order.
    Scan,
}

impl SearchPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchPath::Indexed(_) => "ivf_pq",
            SearchPath::BruteForce => "brute_force",
            SearchPath::FullText(_) => "full_text",
            SearchPath::Scan => "scan",
        }
    }
}

impl fmt::Display for SearchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved vector side of a query.
#[derive(Debug, Clone)]
pub struct VectorTarget {
    pub column: String,
    pub query: Vec<f32>,
    pub metric: MetricType,
}

/// The resolved text side of a full-text query.
#[derive(Debug, Clone)]
pub struct TextTarget {
    pub column: String,
    /// Distinct query terms after tokenization.
    pub terms: Vec<String>,
}

/// A validated, ready-to-run query bound to one table snapshot.
pub struct QueryPlan {
    pub(crate) spec: QuerySpec,
    pub(crate) source: Arc<dyn DataSource>,
    pub(crate) path: SearchPath,
    pub(crate) target: Option<VectorTarget>,
    pub(crate) text: Option<TextTarget>,
    pub(crate) predicate: Option<Predicate>,
    /// Scalar indexes for every filter column, or empty when at least one
    /// filter column is unindexed.
    pub(crate) filter_indices: HashMap<String, Arc<IndexArtifact>>,
    pub(crate) projection: Vec<String>,
    pub(crate) output_schema: Schema,
}

impl fmt::Debug for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPlan")
            .field("path", &self.path.as_str())
            .field("target", &self.target)
            .field("text", &self.text)
            .field("predicate", &self.predicate)
            .field("filter_indices", &self.filter_indices.keys().collect::<Vec<_>>())
            .field("projection", &self.projection)
            .finish()
    }
}

impl QueryPlan {
    /// Validate `spec` against `source` and choose a search path.
    pub fn new(spec: QuerySpec, source: Arc<dyn DataSource>, store: &IndexStore) -> Result<Self> {
        let schema = source.schema().clone();

        let projection: Vec<String> = if spec.projection.is_empty() {
            schema.column_names()
        } else {
            spec.projection
                .iter()
                .filter(|c| !is_computed_column(c))
                .cloned()
                .collect()
        };
        let mut output_schema = schema.project(&projection)?;

        let mut text = None;
        let (path, target) = match &spec.vector {
            None => match &spec.full_text {
                None => (SearchPath::Scan, None),
                Some(query) => {
                    let artifact =
                        resolve_text_index(&schema, spec.full_text_column.as_deref(), store)?;
                    text = Some(TextTarget {
                        column: artifact.column().to_string(),
                        terms: query_terms(query),
                    });
                    (SearchPath::FullText(artifact), None)
                }
            },
            Some(query) => {
                let column = resolve_vector_column(&schema, spec.vector_column.as_deref())?;
                let dim = schema
                    .require(&column)?
                    .data_type
                    .vector_dim()
                    .ok_or_else(|| Error::config(format!("column '{column}' is not a vector column")))?;
                if query.len() != dim {
                    return Err(Error::config(format!(
                        "query vector has dimension {}, column '{column}' has dimension {dim}",
                        query.len()
                    )));
                }
                let (path, metric) = choose_path(&spec, &column, store);
                let target = VectorTarget {
                    column,
                    query: query.clone(),
                    metric,
                };
                (path, Some(target))
            }
        };
        if target.is_some() {
            output_schema.push(Field::new(config::DISTANCE_COLUMN, DataType::Float32));
        }
        if text.is_some() {
            output_schema.push(Field::new(config::SCORE_COLUMN, DataType::Float32));
        }
        if spec.with_row_id {
            output_schema.push(Field::new(config::ROW_ID_COLUMN, DataType::UInt64));
        }

        let predicate = spec
            .filter
            .as_ref()
            .map(|expr| Predicate::bind(expr, &schema))
            .transpose()?;

        let mut filter_indices = HashMap::new();
        if let Some(p) = &predicate {
            for column in p.columns() {
                match store.find(column, IndexKind::Scalar) {
                    Some(idx) => {
                        filter_indices.insert(column.clone(), idx);
                    }
                    None => {
                        filter_indices.clear();
                        break;
                    }
                }
            }
        }

        tracing::debug!(
            "Planned query: path={}, limit={}, nprobes={}, refine_factor={}, prefilter={}, filter={}, index pushdown={}",
            path,
            spec.limit,
            spec.nprobes,
            spec.refine_factor,
            spec.prefilter,
            predicate
                .as_ref()
                .map(|p| p.expr().to_string())
                .unwrap_or_else(|| "none".into()),
            !filter_indices.is_empty()
        );

        Ok(Self {
            spec,
            source,
            path,
            target,
            text,
            predicate,
            filter_indices,
            projection,
            output_schema,
        })
    }

    pub fn path(&self) -> &SearchPath {
        &self.path
    }

    /// Schema of every emitted batch.
    pub fn output_schema(&self) -> &Schema {
        &self.output_schema
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Whether the filter will be answered from scalar indexes.
    pub fn uses_index_pushdown(&self) -> bool {
        !self.filter_indices.is_empty()
    }

    /// Start executing. No data is read until the first batch is pulled.
    pub fn execute(self) -> QueryExecution {
        QueryExecution::new(self)
    }
}

/// Columns the executor appends itself; requesting them is a no-op.
fn is_computed_column(name: &str) -> bool {
    config::RESERVED_COLUMNS.contains(&name)
}

/// The full-text index to search: the one on `requested`, or the table's only
/// full-text index. `NotFound` when there is none.
fn resolve_text_index(
    schema: &Schema,
    requested: Option<&str>,
    store: &IndexStore,
) -> Result<Arc<IndexArtifact>> {
    if let Some(column) = requested {
        let field = schema.require(column)?;
        if field.data_type != DataType::Utf8 {
            return Err(Error::config(format!(
                "full-text search requires a Utf8 column, '{column}' is {}",
                field.data_type
            )));
        }
        return store.find(column, IndexKind::Fts).ok_or_else(|| {
            Error::not_found(format!("column '{column}' has no full-text index"))
        });
    }
    let candidates: Vec<Arc<IndexArtifact>> = store
        .list()
        .iter()
        .filter(|d| d.kind() == IndexKind::Fts && schema.field(d.column()).is_some())
        .filter_map(|d| store.get(d.name()))
        .collect();
    match candidates.as_slice() {
        [only] => Ok(Arc::clone(only)),
        [] => Err(Error::not_found("table has no full-text index")),
        _ => Err(Error::config(
            "table has several full-text indexes; set the column to search",
        )),
    }
}

fn resolve_vector_column(schema: &Schema, requested: Option<&str>) -> Result<String> {
    if let Some(column) = requested {
        return Ok(column.to_string());
    }
    let vectors: Vec<&Field> = schema
        .fields()
        .iter()
        .filter(|f| f.data_type.vector_dim().is_some())
        .collect();
    match vectors.as_slice() {
        [only] => Ok(only.name.clone()),
        [] => Err(Error::config("table has no vector column to search")),
        _ => Err(Error::config(
            "table has several vector columns; set the column to search",
        )),
    }
}

/// Use the IVF-PQ index on `column` when one exists and its metric agrees with
/// the requested one; otherwise fall back to exact search.
fn choose_path(spec: &QuerySpec, column: &str, store: &IndexStore) -> (SearchPath, MetricType) {
    match store.find(column, IndexKind::IvfPq) {
        Some(artifact) => {
            let index_metric = artifact
                .as_ivf_pq()
                .map(|idx| idx.metric)
                .unwrap_or_default();
            match spec.metric {
                Some(m) if m != index_metric => {
                    tracing::warn!(
                        "Query metric {} differs from index '{}' metric {}; using brute force",
                        m,
                        artifact.name(),
                        index_metric
                    );
                    (SearchPath::BruteForce, m)
                }
                _ => (SearchPath::Indexed(artifact), index_metric),
            }
        }
        None => (SearchPath::BruteForce, spec.metric.unwrap_or_default()),
    }
}
