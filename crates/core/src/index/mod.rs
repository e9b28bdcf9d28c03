//! Index artifacts and their lifecycle.
//!
//! - [`descriptor`]: validated build configuration
//! - [`builder`]: trains and encodes an artifact from a table snapshot
//! - [`ivf_pq`] / [`scalar`]: vector and scalar artifacts; full-text artifacts
//!   hold a [`crate::fts::InvertedIndex`]
//! - [`store`]: the per-table registry readers resolve indexes from
//! - [`persistence`]: checksummed on-disk encoding of artifacts

pub mod builder;
pub mod descriptor;
pub mod ivf_pq;
pub mod persistence;
pub mod scalar;
pub mod store;

pub use builder::IndexBuilder;
pub use descriptor::{IndexDescriptor, IndexDescriptorBuilder, IndexKind, IndexParams, IvfPqParams};
pub use ivf_pq::{IvfPqIndex, PostingList};
pub use scalar::ScalarIndex;
pub use store::{IndexStats, IndexStore};

use crate::error::{Error, Result};
use crate::fts::InvertedIndex;
use crate::table::schema::{DataType, Schema};
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};

/// Trained index payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexData {
    IvfPq(IvfPqIndex),
    Scalar(ScalarIndex),
    Fts(InvertedIndex),
}

/// A published, immutable index.
///
/// Records the table version it was built from and the exact row ids it
/// covers, so queries can tell indexed rows from rows written afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexArtifact {
    pub descriptor: IndexDescriptor,
    pub table_version: u64,
    pub covered: RoaringTreemap,
    pub data: IndexData,
}

impl IndexArtifact {
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn column(&self) -> &str {
        self.descriptor.column()
    }

    pub fn kind(&self) -> IndexKind {
        self.descriptor.kind()
    }

    pub fn as_ivf_pq(&self) -> Option<&IvfPqIndex> {
        match &self.data {
            IndexData::IvfPq(idx) => Some(idx),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarIndex> {
        match &self.data {
            IndexData::Scalar(idx) => Some(idx),
            _ => None,
        }
    }

    pub fn as_fts(&self) -> Option<&InvertedIndex> {
        match &self.data {
            IndexData::Fts(idx) => Some(idx),
            _ => None,
        }
    }

    /// Fail with `Config` unless this artifact can serve its column in
    /// `schema`: the column exists with the type, and for vectors the
    /// dimension, the index was built over.
    pub fn check_schema(&self, schema: &Schema) -> Result<()> {
        let field = schema.require(self.column())?;
        let compatible = match (&self.data, field.data_type) {
            (IndexData::IvfPq(idx), DataType::Vector(dim)) => idx.dim == dim,
            (IndexData::Scalar(idx), data_type) => idx.data_type == data_type,
            (IndexData::Fts(_), DataType::Utf8) => true,
            _ => false,
        };
        if compatible {
            return Ok(());
        }
        let built_for = match &self.data {
            IndexData::IvfPq(idx) => DataType::Vector(idx.dim),
            IndexData::Scalar(idx) => idx.data_type,
            IndexData::Fts(_) => DataType::Utf8,
        };
        Err(Error::config(format!(
            "{} index '{}' was built over a {} column, but '{}' is {}",
            self.kind(),
            self.name(),
            built_for,
            self.column(),
            field.data_type
        )))
    }
}
