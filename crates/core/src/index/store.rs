//! Per-table registry of published index artifacts.
//!
//! Artifacts are immutable and shared as `Arc`s. Publishing swaps the map entry
//! under a write lock, so a reader resolves either the complete previous
//! artifact or the complete new one.

use crate::distance::MetricType;
use crate::error::{Error, Result};
use crate::index::descriptor::{IndexDescriptor, IndexKind};
use crate::index::persistence;
use crate::index::{IndexArtifact, IndexData};
use crate::table::schema::Schema;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Summary of one index, for listing and diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub name: String,
    pub column: String,
    pub kind: IndexKind,
    pub table_version: u64,
    pub num_indexed_rows: u64,
    pub metric: Option<MetricType>,
    pub num_partitions: Option<usize>,
    pub partition_sizes: Option<Vec<usize>>,
    pub num_distinct_values: Option<usize>,
    pub num_terms: Option<usize>,
}

impl IndexStats {
    pub fn of(artifact: &IndexArtifact) -> Self {
        let mut stats = IndexStats {
            name: artifact.name().to_string(),
            column: artifact.column().to_string(),
            kind: artifact.kind(),
            table_version: artifact.table_version,
            num_indexed_rows: artifact.covered.len(),
            metric: None,
            num_partitions: None,
            partition_sizes: None,
            num_distinct_values: None,
            num_terms: None,
        };
        match &artifact.data {
            IndexData::IvfPq(idx) => {
                stats.metric = Some(idx.metric);
                stats.num_partitions = Some(idx.num_partitions());
                stats.partition_sizes = Some(idx.partition_sizes());
            }
            IndexData::Scalar(idx) => {
                stats.num_distinct_values = Some(idx.num_distinct());
            }
            IndexData::Fts(idx) => {
                stats.num_terms = Some(idx.num_terms());
            }
        }
        stats
    }
}

#[derive(Debug, Default)]
pub struct IndexStore {
    indices: RwLock<BTreeMap<String, Arc<IndexArtifact>>>,
}

impl IndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `Conflict` if publishing `descriptor` would collide with an
    /// existing index and `replace` is not set.
    ///
    /// An index collides when it has the same name, or the same kind on the
    /// same column.
    pub fn check_conflict(&self, descriptor: &IndexDescriptor) -> Result<()> {
        let indices = self.indices.read();
        check_conflict(&indices, descriptor)
    }

    /// Publish a freshly built artifact in one step.
    ///
    /// With `replace`, any colliding index is superseded; without it, a
    /// collision that appeared while the artifact was being built is reported
    /// as `Conflict` and the store is left untouched.
    pub fn publish(&self, artifact: IndexArtifact) -> Result<Vec<Arc<IndexArtifact>>> {
        let mut indices = self.indices.write();
        check_conflict(&indices, &artifact.descriptor)?;
        let superseded: Vec<String> = indices
            .values()
            .filter(|a| collides(a, &artifact.descriptor))
            .map(|a| a.name().to_string())
            .collect();
        let replaced = superseded
            .iter()
            .filter_map(|name| indices.remove(name))
            .collect::<Vec<_>>();
        let name = artifact.name().to_string();
        if replaced.is_empty() {
            tracing::info!(
                "Published {} index '{}' on column '{}'",
                artifact.kind(),
                name,
                artifact.column()
            );
        } else {
            tracing::info!(
                "Published {} index '{}' on column '{}', replacing {:?}",
                artifact.kind(),
                name,
                artifact.column(),
                superseded
            );
        }
        indices.insert(name, Arc::new(artifact));
        Ok(replaced)
    }

    /// Descriptors of all indexes, ordered by name.
    pub fn list(&self) -> Vec<IndexDescriptor> {
        self.indices
            .read()
            .values()
            .map(|a| a.descriptor.clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<IndexArtifact>> {
        self.indices.read().get(name).cloned()
    }

    /// The index of `kind` on `column`, if any.
    pub fn find(&self, column: &str, kind: IndexKind) -> Option<Arc<IndexArtifact>> {
        self.indices
            .read()
            .values()
            .find(|a| a.column() == column && a.kind() == kind)
            .cloned()
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        match self.indices.write().remove(name) {
            Some(_) => {
                tracing::info!("Dropped index '{}'", name);
                Ok(())
            }
            None => Err(Error::not_found(format!("index '{name}' does not exist"))),
        }
    }

    pub fn stats(&self, name: &str) -> Result<IndexStats> {
        let artifact = self
            .get(name)
            .ok_or_else(|| Error::not_found(format!("index '{name}' does not exist")))?;
        Ok(IndexStats::of(&artifact))
    }

    pub fn len(&self) -> usize {
        self.indices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.read().is_empty()
    }

    /// Persist every index to `dir`. Returns the number of files written.
    pub fn save_all(&self, dir: &Path) -> Result<usize> {
        let snapshot: Vec<Arc<IndexArtifact>> = self.indices.read().values().cloned().collect();
        for artifact in &snapshot {
            persistence::save_index(artifact, dir)?;
        }
        Ok(snapshot.len())
    }

    /// Load every index file in `dir` into a store serving a table with
    /// `schema`. A loaded artifact replaces the same-named entry.
    ///
    /// A missing directory loads nothing. The load is all or nothing: a
    /// corrupt file fails with `Data`, an artifact whose column is missing or
    /// has a different type or dimension fails with `Config`, and a second
    /// index of the same kind on the same column under another name fails with
    /// `Conflict`. On any failure the store is unchanged.
    pub fn load_all(&self, dir: &Path, schema: &Schema) -> Result<usize> {
        let loaded = persistence::load_dir(dir)?;
        for artifact in &loaded {
            artifact.check_schema(schema)?;
        }
        let count = loaded.len();
        let mut indices = self.indices.write();
        let mut next = indices.clone();
        for artifact in loaded {
            next.remove(artifact.name());
            if let Some(existing) = next
                .values()
                .find(|a| a.column() == artifact.column() && a.kind() == artifact.kind())
            {
                return Err(Error::conflict(format!(
                    "loaded index '{}' collides with index '{}' ({} on '{}')",
                    artifact.name(),
                    existing.name(),
                    existing.kind(),
                    existing.column()
                )));
            }
            next.insert(artifact.name().to_string(), Arc::new(artifact));
        }
        *indices = next;
        Ok(count)
    }
}

fn collides(existing: &IndexArtifact, descriptor: &IndexDescriptor) -> bool {
    existing.name() == descriptor.name()
        || (existing.column() == descriptor.column() && existing.kind() == descriptor.kind())
}

fn check_conflict(
    indices: &BTreeMap<String, Arc<IndexArtifact>>,
    descriptor: &IndexDescriptor,
) -> Result<()> {
    if descriptor.replace() {
        return Ok(());
    }
    match indices.values().find(|a| collides(a, descriptor)) {
        Some(existing) => Err(Error::conflict(format!(
            "index '{}' ({} on '{}') already exists; set replace to supersede it",
            existing.name(),
            existing.kind(),
            existing.column()
        ))),
        None => Ok(()),
    }
}
