//! Error taxonomy shared by index build, query planning and execution.
//!
//! Every fallible operation in the crate returns [`Result`]. The variants map
//! one-to-one onto the caller-facing classes:
//! - `Config` → invalid parameters, surfaced before any data is touched
//! - `Conflict` → index already exists, or a table write lost an optimistic race
//! - `Data` / `Io` → failures encountered while reading data mid-scan or mid-build
//! - `NotFound` → a referenced index or column does not exist

use thiserror::Error;

/// Errors produced by lakevec.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid build or query parameters.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The target already exists (and `replace` was not requested), or the
    /// table version moved underneath an optimistic write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Corruption or a read failure encountered while scanning.
    #[error("data error: {0}")]
    Data(String),

    /// A referenced index does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying I/O failure (persistence). Treated as a data error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Error::Data(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Whether a caller may reasonably retry the failed operation.
    ///
    /// Config and NotFound indicate caller mistakes and never succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::Data(_) | Error::Io(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Data(format!("serialization failed: {e}"))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(!Error::config("k must be positive").is_retryable());
        assert!(!Error::not_found("idx").is_retryable());
        assert!(Error::conflict("exists").is_retryable());
        assert!(Error::data("short read").is_retryable());
        let io = Error::from(std::io::Error::other("disk"));
        assert!(io.is_retryable());
    }

    #[test]
    fn test_display_carries_message() {
        let e = Error::config("numSubVectors must divide dimension");
        assert_eq!(
            e.to_string(),
            "invalid configuration: numSubVectors must divide dimension"
        );
    }
}
