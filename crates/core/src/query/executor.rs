//! Query execution.
//!
//! A [`QueryExecution`] is a lazy iterator of result batches. The first pull
//! runs the search (`Searching`), the optional exact re-rank (`Refining`) and
//! the post-filter (`Filtering`); every later pull materializes one bounded
//! batch (`Streaming`) until the result is exhausted (`Done`). Any error moves
//! the execution to `Failed`, after which it yields nothing more. Batches
//! already handed out are never retracted.

use crate::config;
use crate::error::{Error, Result};
use crate::fts::scorer;
use crate::index::IndexArtifact;
use crate::query::plan::{QueryPlan, SearchPath, TextTarget, VectorTarget};
use crate::query::predicate::{Expr, Predicate};
use crate::query::topk::{sort_candidates, Candidate, TopK};
use crate::table::batch::{ColumnData, RecordBatch};
use crate::table::schema::{DataType, Field, Schema};
use crate::table::source::{Cursor, DataSource};
use roaring::RoaringTreemap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Planned,
    Searching,
    Refining,
    Filtering,
    Streaming,
    Done,
    Failed,
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryPhase::Planned => "planned",
            QueryPhase::Searching => "searching",
            QueryPhase::Refining => "refining",
            QueryPhase::Filtering => "filtering",
            QueryPhase::Streaming => "streaming",
            QueryPhase::Done => "done",
            QueryPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

pub struct QueryExecution {
    plan: QueryPlan,
    phase: QueryPhase,
    results: Vec<Candidate>,
    emitted: usize,
    _cursor: Cursor,
}

impl QueryExecution {
    pub(crate) fn new(plan: QueryPlan) -> Self {
        let cursor = plan.source.cursor();
        Self {
            plan,
            phase: QueryPhase::Planned,
            results: Vec::new(),
            emitted: 0,
            _cursor: cursor,
        }
    }

    pub fn phase(&self) -> QueryPhase {
        self.phase
    }

    pub fn schema(&self) -> &Schema {
        &self.plan.output_schema
    }

    /// Produce the next batch, `Ok(None)` once the result is exhausted.
    pub fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        match self.phase {
            QueryPhase::Done | QueryPhase::Failed => return Ok(None),
            QueryPhase::Planned => {
                if let Err(e) = self.run() {
                    return Err(self.fail(e));
                }
                self.phase = QueryPhase::Streaming;
            }
            _ => {}
        }
        match self.emit() {
            Ok(Some(batch)) => Ok(Some(batch)),
            Ok(None) => {
                self.phase = QueryPhase::Done;
                Ok(None)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, e: Error) -> Error {
        tracing::warn!("Query failed while {}: {}", self.phase, e);
        self.phase = QueryPhase::Failed;
        e
    }

    /// Compute the ordered result rows.
    fn run(&mut self) -> Result<()> {
        let start = Instant::now();
        let source = Arc::clone(&self.plan.source);
        let source = source.as_ref();
        let live = source.live_rows();
        let spec = &self.plan.spec;

        if let SearchPath::Scan = self.plan.path {
            self.phase = QueryPhase::Filtering;
            let rows = match &self.plan.predicate {
                Some(p) => admissible_rows(source, p, &self.plan.filter_indices, &live)?,
                None => live,
            };
            self.results = rows
                .iter()
                .take(spec.limit)
                .map(|row_id| Candidate {
                    row_id,
                    approx_distance: 0.0,
                    exact_distance: None,
                })
                .collect();
            tracing::debug!(
                "Scan query matched {} rows in {:?}",
                self.results.len(),
                start.elapsed()
            );
            return Ok(());
        }

        self.phase = QueryPhase::Searching;
        let admissible = match (&self.plan.predicate, spec.prefilter) {
            (Some(p), true) => Some(admissible_rows(source, p, &self.plan.filter_indices, &live)?),
            _ => None,
        };
        let mut candidates = match (&self.plan.path, &self.plan.target, &self.plan.text) {
            (SearchPath::FullText(artifact), _, Some(text)) => {
                let mut top = TopK::new(spec.limit);
                search_text(
                    source,
                    artifact,
                    text,
                    spec.fast_search,
                    &live,
                    admissible.as_ref(),
                    &mut top,
                )?;
                top.into_sorted()
            }
            (path, Some(target), _) => {
                let mut top = TopK::new(spec.pool_size());
                let exact = match path {
                    SearchPath::Indexed(artifact) => search_indexed(
                        source,
                        artifact,
                        target,
                        spec.nprobes,
                        spec.limit,
                        spec.fast_search,
                        &live,
                        admissible.as_ref(),
                        &mut top,
                    )?,
                    _ => {
                        flat_search(source, target, None, admissible.as_ref(), &mut top)?;
                        true
                    }
                };
                let mut candidates = top.into_sorted();
                if spec.refine_factor > 1.0 && !exact {
                    self.phase = QueryPhase::Refining;
                    refine(source, target, &mut candidates)?;
                }
                candidates
            }
            (path, None, _) => {
                return Err(Error::data(format!("{path} search has no query target")));
            }
        };
        candidates.truncate(spec.limit);

        if let (Some(p), false) = (&self.plan.predicate, spec.prefilter) {
            self.phase = QueryPhase::Filtering;
            let before = candidates.len();
            post_filter(source, p, &mut candidates)?;
            tracing::debug!(
                "Post-filter kept {} of {} candidates",
                candidates.len(),
                before
            );
        }

        tracing::debug!(
            "Query via {} produced {} rows in {:?}",
            self.plan.path,
            candidates.len(),
            start.elapsed()
        );
        self.results = candidates;
        Ok(())
    }

    /// Materialize the next chunk of result rows.
    fn emit(&mut self) -> Result<Option<RecordBatch>> {
        if self.emitted >= self.results.len() {
            return Ok(None);
        }
        let end = (self.emitted + self.plan.spec.batch_size).min(self.results.len());
        let chunk = &self.results[self.emitted..end];
        let row_ids: Vec<u64> = chunk.iter().map(|c| c.row_id).collect();
        let mut batch = self.plan.source.take(&row_ids, &self.plan.projection)?;
        if self.plan.target.is_some() {
            batch.append_column(
                Field::new(config::DISTANCE_COLUMN, DataType::Float32),
                ColumnData::Float32(chunk.iter().map(Candidate::distance).collect()),
            )?;
        }
        if self.plan.text.is_some() {
            // Scores are ranked as negated distances.
            batch.append_column(
                Field::new(config::SCORE_COLUMN, DataType::Float32),
                ColumnData::Float32(chunk.iter().map(|c| -c.distance()).collect()),
            )?;
        }
        if self.plan.spec.with_row_id {
            batch.append_column(
                Field::new(config::ROW_ID_COLUMN, DataType::UInt64),
                ColumnData::UInt64(row_ids),
            )?;
        }
        self.emitted = end;
        Ok(Some(batch))
    }
}

impl Iterator for QueryExecution {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}

impl fmt::Debug for QueryExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryExecution")
            .field("plan", &self.plan)
            .field("phase", &self.phase)
            .field("results", &self.results.len())
            .field("emitted", &self.emitted)
            .finish()
    }
}

/// Search the index, then flat-scan live rows the index does not cover.
///
/// A search of every partition ranks on exact distances, so it returns the
/// brute-force answer. Returns whether the pooled distances are exact.
#[allow(clippy::too_many_arguments)]
fn search_indexed(
    source: &dyn DataSource,
    artifact: &IndexArtifact,
    target: &VectorTarget,
    nprobes: usize,
    limit: usize,
    fast_search: bool,
    live: &RoaringTreemap,
    admissible: Option<&RoaringTreemap>,
    top: &mut TopK,
) -> Result<bool> {
    let index = artifact
        .as_ivf_pq()
        .ok_or_else(|| Error::data(format!("index '{}' is not an IVF_PQ index", artifact.name())))?;
    if nprobes >= index.num_partitions() {
        let rows = if fast_search {
            live & &artifact.covered
        } else {
            live.clone()
        };
        tracing::debug!(
            "nprobes {} covers all {} partitions of '{}'; scoring {} rows exactly",
            nprobes,
            index.num_partitions(),
            artifact.name(),
            rows.len()
        );
        flat_search(source, target, Some(&rows), admissible, top)?;
        return Ok(true);
    }
    // A prefiltered search keeps searching past `nprobes` until it holds enough
    // admissible rows to fill the result.
    let min_kept = if admissible.is_some() { limit } else { 0 };
    index.search(&target.query, nprobes, min_kept, |row_id, distance| {
        // Entries for rows deleted or overwritten since the build are skipped.
        let keep = live.contains(row_id) && admissible.is_none_or(|a| a.contains(row_id));
        if keep {
            top.push(row_id, distance);
        }
        keep
    });

    if fast_search {
        return Ok(false);
    }
    let unindexed = live - &artifact.covered;
    if !unindexed.is_empty() {
        tracing::debug!(
            "Flat-scanning {} rows not covered by index '{}'",
            unindexed.len(),
            artifact.name()
        );
        flat_search(source, target, Some(&unindexed), admissible, top)?;
    }
    Ok(false)
}

/// Rank live, admissible rows by BM25 score.
///
/// Indexed rows are scored from the postings. Rows written after the build are
/// read and scored against the index's corpus statistics unless `fast_search`
/// is set. Rows matching no query term are never candidates.
fn search_text(
    source: &dyn DataSource,
    artifact: &IndexArtifact,
    text: &TextTarget,
    fast_search: bool,
    live: &RoaringTreemap,
    admissible: Option<&RoaringTreemap>,
    top: &mut TopK,
) -> Result<()> {
    let index = artifact
        .as_fts()
        .ok_or_else(|| Error::data(format!("index '{}' is not an FTS index", artifact.name())))?;
    for (row_id, score) in scorer::score_indexed(index, &text.terms) {
        if live.contains(row_id) && admissible.is_none_or(|a| a.contains(row_id)) {
            top.push(row_id, -score);
        }
    }
    if fast_search {
        return Ok(());
    }
    let mut unindexed = live - &artifact.covered;
    if let Some(a) = admissible {
        unindexed &= a;
    }
    if unindexed.is_empty() {
        return Ok(());
    }
    tracing::debug!(
        "Scoring {} rows not covered by index '{}'",
        unindexed.len(),
        artifact.name()
    );
    let columns = [text.column.clone()];
    take_chunks(source, &unindexed, &columns, |batch| {
        let col = batch.column(0);
        for (i, &row_id) in batch.row_ids().iter().enumerate() {
            let doc = col.text(i).ok_or_else(|| {
                Error::data(format!("column '{}' returned non-text data", text.column))
            })?;
            if let Some(score) = scorer::score_text(index, &text.terms, doc) {
                top.push(row_id, -score);
            }
        }
        Ok(())
    })
}

/// Exact distances over `rows` (all rows when `None`) that are admissible.
fn flat_search(
    source: &dyn DataSource,
    target: &VectorTarget,
    rows: Option<&RoaringTreemap>,
    admissible: Option<&RoaringTreemap>,
    top: &mut TopK,
) -> Result<()> {
    let columns = [target.column.clone()];
    let mut visit = |batch: RecordBatch| -> Result<()> {
        let col = batch.column(0);
        for (i, &row_id) in batch.row_ids().iter().enumerate() {
            let v = col.vector(i).ok_or_else(|| {
                Error::data(format!("column '{}' returned non-vector data", target.column))
            })?;
            top.push(row_id, target.metric.distance(&target.query, v));
        }
        Ok(())
    };
    match (rows, admissible) {
        (None, None) => {
            for batch in source.scan(&columns, config::SCAN_BATCH_SIZE)? {
                visit(batch?)?;
            }
            Ok(())
        }
        (Some(r), None) => take_chunks(source, r, &columns, visit),
        (None, Some(a)) => take_chunks(source, a, &columns, visit),
        (Some(r), Some(a)) => take_chunks(source, &(r & a), &columns, visit),
    }
}

/// Replace approximate distances with exact ones and re-rank.
fn refine(
    source: &dyn DataSource,
    target: &VectorTarget,
    candidates: &mut [Candidate],
) -> Result<()> {
    if candidates.is_empty() {
        return Ok(());
    }
    let row_ids: Vec<u64> = candidates.iter().map(|c| c.row_id).collect();
    let batch = source.take(&row_ids, std::slice::from_ref(&target.column))?;
    let col = batch.column(0);
    for (i, c) in candidates.iter_mut().enumerate() {
        let v = col.vector(i).ok_or_else(|| {
            Error::data(format!("column '{}' returned non-vector data", target.column))
        })?;
        c.exact_distance = Some(target.metric.distance(&target.query, v));
    }
    sort_candidates(candidates);
    Ok(())
}

/// Drop ranked candidates that fail the predicate, keeping order.
fn post_filter(
    source: &dyn DataSource,
    predicate: &Predicate,
    candidates: &mut Vec<Candidate>,
) -> Result<()> {
    if candidates.is_empty() {
        return Ok(());
    }
    let row_ids: Vec<u64> = candidates.iter().map(|c| c.row_id).collect();
    let batch = source.take(&row_ids, predicate.columns())?;
    let mask = predicate.evaluate(&batch)?;
    let mut keep = mask.into_iter();
    candidates.retain(|_| keep.next().unwrap_or(false));
    Ok(())
}

/// Rows among `live` that satisfy `predicate`.
///
/// With a scalar index on every filter column the indexed part is answered
/// by index lookups; rows outside the indexes' coverage are evaluated by
/// reading them. Otherwise the filter columns are scanned in full.
pub(crate) fn admissible_rows(
    source: &dyn DataSource,
    predicate: &Predicate,
    indices: &HashMap<String, Arc<IndexArtifact>>,
    live: &RoaringTreemap,
) -> Result<RoaringTreemap> {
    if !indices.is_empty() {
        let mut universe = live.clone();
        for artifact in indices.values() {
            universe &= &artifact.covered;
        }
        if let Some(hits) = index_lookup(predicate.expr(), indices, &universe) {
            let mut out = hits & &universe;
            let rest = live - &universe;
            if !rest.is_empty() {
                evaluate_rows(source, predicate, Some(&rest), &mut out)?;
            }
            return Ok(out);
        }
        tracing::debug!("Filter literal types do not match index keys; scanning");
    }
    let mut out = RoaringTreemap::new();
    evaluate_rows(source, predicate, None, &mut out)?;
    out &= live;
    Ok(out)
}

/// Answer `expr` from scalar indexes, relative to `universe`. `None` when some
/// leaf cannot be answered by its index.
fn index_lookup(
    expr: &Expr,
    indices: &HashMap<String, Arc<IndexArtifact>>,
    universe: &RoaringTreemap,
) -> Option<RoaringTreemap> {
    match expr {
        Expr::Literal(true) => Some(universe.clone()),
        Expr::Literal(false) => Some(RoaringTreemap::new()),
        Expr::Compare { column, op, value } => {
            indices.get(column)?.as_scalar()?.lookup(*op, value)
        }
        Expr::InList {
            column,
            values,
            negated,
        } => {
            let hits = indices.get(column)?.as_scalar()?.lookup_in(values)?;
            Some(if *negated { universe - &hits } else { hits })
        }
        Expr::And(l, r) => {
            let l = index_lookup(l, indices, universe)?;
            let r = index_lookup(r, indices, universe)?;
            Some(l & r)
        }
        Expr::Or(l, r) => {
            let l = index_lookup(l, indices, universe)?;
            let r = index_lookup(r, indices, universe)?;
            Some(l | r)
        }
        Expr::Not(e) => {
            let inner = index_lookup(e, indices, universe)?;
            Some(universe - &inner)
        }
    }
}

/// Evaluate the predicate over `rows` (every row when `None`), inserting
/// matching row ids into `out`.
fn evaluate_rows(
    source: &dyn DataSource,
    predicate: &Predicate,
    rows: Option<&RoaringTreemap>,
    out: &mut RoaringTreemap,
) -> Result<()> {
    let mut visit = |batch: RecordBatch| -> Result<()> {
        let mask = predicate.evaluate(&batch)?;
        for (&row_id, hit) in batch.row_ids().iter().zip(mask) {
            if hit {
                out.insert(row_id);
            }
        }
        Ok(())
    };
    match rows {
        Some(r) => take_chunks(source, r, predicate.columns(), visit),
        None => {
            for batch in source.scan(predicate.columns(), config::SCAN_BATCH_SIZE)? {
                visit(batch?)?;
            }
            Ok(())
        }
    }
}

/// Read `rows` in ascending id order, `SCAN_BATCH_SIZE` rows per call.
fn take_chunks(
    source: &dyn DataSource,
    rows: &RoaringTreemap,
    columns: &[String],
    mut visit: impl FnMut(RecordBatch) -> Result<()>,
) -> Result<()> {
    let mut chunk = Vec::with_capacity(config::SCAN_BATCH_SIZE.min(rows.len() as usize));
    for row_id in rows.iter() {
        chunk.push(row_id);
        if chunk.len() == config::SCAN_BATCH_SIZE {
            visit(source.take(&chunk, columns)?)?;
            chunk.clear();
        }
    }
    if !chunk.is_empty() {
        visit(source.take(&chunk, columns)?)?;
    }
    Ok(())
}
