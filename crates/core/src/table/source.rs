//! The table data source boundary consumed by index builds and queries.

use crate::error::Result;
use crate::table::batch::RecordBatch;
use crate::table::schema::Schema;
use roaring::RoaringTreemap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Iterator of scanned batches. Each item may fail mid-scan with a data error.
pub type BatchIter<'a> = Box<dyn Iterator<Item = Result<RecordBatch>> + Send + 'a>;

/// A snapshot-consistent, read-only view of a table.
///
/// Implementations must return the same rows for the lifetime of the value:
/// builds and queries hold one view from start to finish and never observe
/// concurrent writes.
pub trait DataSource: Send + Sync {
    fn schema(&self) -> &Schema;

    /// Opaque token identifying the table state this view reflects.
    fn version(&self) -> u64;

    fn row_count(&self) -> u64;

    /// Row ids of every row in the view.
    fn live_rows(&self) -> RoaringTreemap;

    /// Stream the named columns in row-id order, at most `batch_size` rows per batch.
    fn scan(&self, columns: &[String], batch_size: usize) -> Result<BatchIter<'_>>;

    /// Fetch the named columns for specific rows, in the order requested.
    fn take(&self, row_ids: &[u64], columns: &[String]) -> Result<RecordBatch>;

    /// Register an open reader. The returned guard releases it on drop.
    fn cursor(&self) -> Cursor;
}

/// Counts open readers of a table so tests can observe leaks.
#[derive(Debug, Clone, Default)]
pub struct CursorTracker {
    open: Arc<AtomicUsize>,
}

impl CursorTracker {
    pub fn open(&self) -> Cursor {
        self.open.fetch_add(1, Ordering::AcqRel);
        Cursor {
            open: Some(Arc::clone(&self.open)),
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }
}

/// RAII guard for an open reader.
#[derive(Debug)]
pub struct Cursor {
    open: Option<Arc<AtomicUsize>>,
}

impl Cursor {
    /// A guard that is not tracked anywhere, for sources without accounting.
    pub fn untracked() -> Self {
        Cursor { open: None }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if let Some(open) = self.open.take() {
            open.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
