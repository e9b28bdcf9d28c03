//! Hybrid query planning and execution.
//!
//! A [`QuerySpec`] is validated against a table snapshot into a [`QueryPlan`],
//! which executes as a lazy [`QueryExecution`] iterator of result batches.

/// Lazy execution: search, refine, filter, and batch emission.
pub mod executor;
/// Schema-dependent validation and search path selection.
pub mod plan;
/// SQL-like filter expressions: parse, bind, evaluate.
pub mod predicate;
/// `QuerySpec` and its validated builder.
pub mod request;
/// Bounded top-k candidate pool.
pub mod topk;

pub use executor::{QueryExecution, QueryPhase};
pub use plan::{QueryPlan, SearchPath};
pub use predicate::{CmpOp, Expr, Predicate};
pub use request::{QuerySpec, QuerySpecBuilder};
pub use topk::Candidate;
