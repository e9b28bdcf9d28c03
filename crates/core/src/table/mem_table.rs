//! In-memory fragment store implementing [`DataSource`].
//!
//! A [`MemTable`] owns an append-only list of fragments. Every write publishes
//! a new immutable [`TableSnapshot`]; readers keep whichever snapshot they
//! started with, which gives builds and queries a consistent view for free.
//! Row ids are assigned from a monotonically increasing counter and never
//! reused, so an overwrite retires the old ids instead of recycling them.

use crate::error::{Error, Result};
use crate::table::batch::{ColumnData, RecordBatch};
use crate::table::schema::Schema;
use crate::table::source::{BatchIter, Cursor, CursorTracker, DataSource};
use parking_lot::RwLock;
use roaring::RoaringTreemap;
use std::sync::Arc;

/// An immutable chunk of rows with contiguous row ids starting at `first_row_id`.
#[derive(Debug)]
pub struct Fragment {
    pub id: u64,
    pub first_row_id: u64,
    pub batch: RecordBatch,
}

impl Fragment {
    fn contains(&self, row_id: u64) -> bool {
        row_id >= self.first_row_id && row_id < self.first_row_id + self.batch.num_rows() as u64
    }
}

/// Point-in-time view of a [`MemTable`].
#[derive(Debug)]
pub struct TableSnapshot {
    schema: Schema,
    version: u64,
    fragments: Vec<Arc<Fragment>>,
    cursors: CursorTracker,
}

impl TableSnapshot {
    pub fn fragments(&self) -> &[Arc<Fragment>] {
        &self.fragments
    }

    fn locate(&self, row_id: u64) -> Option<(&Fragment, usize)> {
        let idx = self
            .fragments
            .partition_point(|f| f.first_row_id + f.batch.num_rows() as u64 <= row_id);
        let frag = self.fragments.get(idx)?;
        if frag.contains(row_id) {
            Some((frag, (row_id - frag.first_row_id) as usize))
        } else {
            None
        }
    }
}

impl DataSource for TableSnapshot {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn row_count(&self) -> u64 {
        self.fragments.iter().map(|f| f.batch.num_rows() as u64).sum()
    }

    fn live_rows(&self) -> RoaringTreemap {
        let mut rows = RoaringTreemap::new();
        for f in &self.fragments {
            rows.insert_range(f.first_row_id..f.first_row_id + f.batch.num_rows() as u64);
        }
        rows
    }

    fn scan(&self, columns: &[String], batch_size: usize) -> Result<BatchIter<'_>> {
        self.schema.project(columns)?;
        let batch_size = batch_size.max(1);
        let columns = columns.to_vec();
        let cursor = self.cursors.open();
        let iter = self.fragments.iter().flat_map(move |frag| {
            let rows = frag.batch.num_rows();
            let columns = columns.clone();
            (0..rows)
                .step_by(batch_size)
                .map(move |offset| {
                    let len = batch_size.min(rows - offset);
                    frag.batch.slice(offset, len).project(&columns)
                })
        });
        Ok(Box::new(CursorIter {
            inner: iter,
            _cursor: cursor,
        }))
    }

    fn take(&self, row_ids: &[u64], columns: &[String]) -> Result<RecordBatch> {
        let schema = self.schema.project(columns)?;
        let mut cols: Vec<ColumnData> = schema
            .fields()
            .iter()
            .map(|f| ColumnData::empty(f.data_type))
            .collect();
        let col_idx: Vec<usize> = columns
            .iter()
            .filter_map(|c| self.schema.index_of(c))
            .collect();
        for &row_id in row_ids {
            let (frag, offset) = self
                .locate(row_id)
                .ok_or_else(|| Error::data(format!("row id {row_id} not found in table")))?;
            for (dst, &ci) in cols.iter_mut().zip(&col_idx) {
                dst.push_from(frag.batch.column(ci), offset);
            }
        }
        Ok(RecordBatch::try_new(schema, cols)?.with_row_ids(row_ids.to_vec()))
    }

    fn cursor(&self) -> Cursor {
        self.cursors.open()
    }
}

/// Wraps a scan iterator so the cursor is released when the scan is dropped.
struct CursorIter<I> {
    inner: I,
    _cursor: Cursor,
}

impl<I: Iterator<Item = Result<RecordBatch>>> Iterator for CursorIter<I> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

#[derive(Debug)]
struct TableState {
    current: Arc<TableSnapshot>,
    next_row_id: u64,
    next_fragment_id: u64,
}

/// A named, schema-typed, append-only in-memory table.
///
/// Cheap to clone: clones share the same underlying state.
#[derive(Debug, Clone)]
pub struct MemTable {
    name: Arc<str>,
    state: Arc<RwLock<TableState>>,
    cursors: CursorTracker,
}

impl MemTable {
    /// Creates an empty table with the given schema.
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        let cursors = CursorTracker::default();
        let snapshot = TableSnapshot {
            schema,
            version: 0,
            fragments: Vec::new(),
            cursors: cursors.clone(),
        };
        Self {
            name: Arc::from(name.into()),
            state: Arc::new(RwLock::new(TableState {
                current: Arc::new(snapshot),
                next_row_id: 0,
                next_fragment_id: 0,
            })),
            cursors,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Schema {
        self.state.read().current.schema.clone()
    }

    pub fn version(&self) -> u64 {
        self.state.read().current.version
    }

    /// The current state as an immutable, snapshot-consistent view.
    pub fn snapshot(&self) -> Arc<TableSnapshot> {
        Arc::clone(&self.state.read().current)
    }

    /// Number of scan cursors and query executions currently holding this table.
    pub fn open_cursors(&self) -> usize {
        self.cursors.open_count()
    }

    /// Append rows. Returns the new table version.
    pub fn append(&self, batch: RecordBatch) -> Result<u64> {
        self.write(batch, false, None)
    }

    /// Replace all rows. Returns the new table version.
    pub fn overwrite(&self, batch: RecordBatch) -> Result<u64> {
        self.write(batch, true, None)
    }

    /// Append only if the table is still at `expected_version`.
    pub fn append_if_version(&self, expected_version: u64, batch: RecordBatch) -> Result<u64> {
        self.write(batch, false, Some(expected_version))
    }

    /// Overwrite only if the table is still at `expected_version`.
    pub fn overwrite_if_version(&self, expected_version: u64, batch: RecordBatch) -> Result<u64> {
        self.write(batch, true, Some(expected_version))
    }

    fn write(&self, batch: RecordBatch, overwrite: bool, expected: Option<u64>) -> Result<u64> {
        let mut state = self.state.write();
        validate_batch(&state.current.schema, &batch)?;

        let current = Arc::clone(&state.current);
        if let Some(expected) = expected {
            if current.version != expected {
                return Err(Error::conflict(format!(
                    "table '{}' is at version {}, write expected {}",
                    self.name, current.version, expected
                )));
            }
        }

        let rows = batch.num_rows() as u64;
        let mut fragments = if overwrite {
            Vec::new()
        } else {
            current.fragments.clone()
        };
        if rows > 0 {
            let first_row_id = state.next_row_id;
            let row_ids = (first_row_id..first_row_id + rows).collect();
            fragments.push(Arc::new(Fragment {
                id: state.next_fragment_id,
                first_row_id,
                batch: batch.with_row_ids(row_ids),
            }));
            state.next_row_id += rows;
            state.next_fragment_id += 1;
        }

        let version = current.version + 1;
        state.current = Arc::new(TableSnapshot {
            schema: current.schema.clone(),
            version,
            fragments,
            cursors: self.cursors.clone(),
        });
        tracing::debug!(
            "Table '{}' {} {} rows, now at version {}",
            self.name,
            if overwrite { "overwritten with" } else { "appended" },
            rows,
            version
        );
        Ok(version)
    }
}

fn validate_batch(schema: &Schema, batch: &RecordBatch) -> Result<()> {
    if batch.schema() != schema {
        return Err(Error::config(format!(
            "batch schema {:?} does not match table schema {:?}",
            batch.schema().column_names(),
            schema.column_names()
        )));
    }
    for col in batch.columns() {
        if let ColumnData::Vector { values, .. } = col {
            if values.iter().any(|v| !v.is_finite()) {
                return Err(Error::config("vector contains NaN or Inf"));
            }
        }
    }
    Ok(())
}
