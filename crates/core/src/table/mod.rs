//! Table data model and the data source boundary.
//!
//! Columns are non-nullable and typed by [`DataType`]; rows travel in columnar
//! [`RecordBatch`]es that carry their table row ids. [`MemTable`] is the
//! in-memory fragment store; index builds and queries only ever see it through
//! the [`DataSource`] trait on an immutable [`TableSnapshot`].

/// Columnar record batches.
pub mod batch;
/// Append-only in-memory fragment store with snapshot reads.
pub mod mem_table;
/// Column names and types.
pub mod schema;
/// The `DataSource` trait and cursor accounting.
pub mod source;
/// Typed scalar cell values.
pub mod value;

pub use batch::{ColumnData, RecordBatch};
pub use mem_table::{Fragment, MemTable, TableSnapshot};
pub use schema::{DataType, Field, Schema};
pub use source::{BatchIter, Cursor, CursorTracker, DataSource};
pub use value::ScalarValue;
