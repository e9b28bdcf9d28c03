//! lakevec-engine: async surface over `lakevec-core`.
//!
//! Index builds and query executions are blocking, CPU-bound work; this crate
//! runs them on tokio's blocking pool so they never stall the async
//! dispatcher, and exposes query results as a pull-based [`BatchStream`].
//! Core types live in `lakevec-core`.

/// Cancellable, pull-based stream of query result batches.
pub mod stream;
/// Async table handle: writes, index management, queries.
pub mod table;

pub use stream::BatchStream;
pub use table::Table;

use lakevec_core::Error;
use tokio::task::JoinError;

/// A blocking task that panicked or was aborted surfaces as a data error.
pub(crate) fn join_error(e: JoinError) -> Error {
    Error::data(format!("background task failed: {e}"))
}
