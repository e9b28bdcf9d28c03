//! Async table handle.
//!
//! A [`Table`] pairs a [`MemTable`] with the [`IndexStore`] that owns its
//! indexes. Index builds run on the blocking pool against the snapshot taken
//! when the build starts, and are serialized per `(column, name)` so that two
//! builds of the same index never race; builds of different indexes proceed
//! concurrently. A lock entry lives only while some build holds or awaits it.

use crate::join_error;
use crate::stream::BatchStream;
use lakevec_core::index::{IndexBuilder, IndexDescriptor, IndexStats, IndexStore};
use lakevec_core::query::{QueryPlan, QuerySpec};
use lakevec_core::table::{DataSource, MemTable, RecordBatch, Schema};
use lakevec_core::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

type BuildKey = (String, String);
type BuildLocks = Mutex<HashMap<BuildKey, BuildLock>>;

#[derive(Debug, Default)]
struct BuildLock {
    mutex: Arc<tokio::sync::Mutex<()>>,
    /// Builds holding or waiting for `mutex`.
    claims: usize,
}

/// One build's claim on a lock entry; the last claim to drop removes it.
struct BuildSlot {
    locks: Arc<BuildLocks>,
    key: BuildKey,
    mutex: Arc<tokio::sync::Mutex<()>>,
}

impl BuildSlot {
    fn claim(locks: &Arc<BuildLocks>, key: BuildKey) -> Self {
        let mutex = {
            let mut map = locks.lock();
            let entry = map.entry(key.clone()).or_default();
            entry.claims += 1;
            Arc::clone(&entry.mutex)
        };
        Self {
            locks: Arc::clone(locks),
            key,
            mutex,
        }
    }
}

impl Drop for BuildSlot {
    fn drop(&mut self) {
        let mut map = self.locks.lock();
        if let Some(entry) = map.get_mut(&self.key) {
            entry.claims -= 1;
            if entry.claims == 0 {
                map.remove(&self.key);
            }
        }
    }
}

/// Cheap to clone: clones share rows, indexes and build locks.
#[derive(Debug, Clone)]
pub struct Table {
    data: MemTable,
    indices: Arc<IndexStore>,
    build_locks: Arc<BuildLocks>,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            data: MemTable::new(name, schema),
            indices: Arc::new(IndexStore::new()),
            build_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn name(&self) -> &str {
        self.data.name()
    }

    pub fn schema(&self) -> Schema {
        self.data.schema()
    }

    pub fn version(&self) -> u64 {
        self.data.version()
    }

    pub fn count_rows(&self) -> u64 {
        self.data.snapshot().row_count()
    }

    /// Readers (scans and query executions) currently holding this table.
    pub fn open_cursors(&self) -> usize {
        self.data.open_cursors()
    }

    /// The underlying row store.
    pub fn data(&self) -> &MemTable {
        &self.data
    }

    pub fn index_store(&self) -> &Arc<IndexStore> {
        &self.indices
    }

    /// Append rows. Returns the new table version.
    pub fn add(&self, batch: RecordBatch) -> Result<u64> {
        self.data.append(batch)
    }

    /// Replace every row. Existing indexes keep serving the rows they cover
    /// that are still live, which after an overwrite is none of them.
    pub fn overwrite(&self, batch: RecordBatch) -> Result<u64> {
        self.data.overwrite(batch)
    }

    /// Append only if no other write landed since `expected_version`.
    pub fn add_if_version(&self, expected_version: u64, batch: RecordBatch) -> Result<u64> {
        self.data.append_if_version(expected_version, batch)
    }

    /// Overwrite only if no other write landed since `expected_version`.
    pub fn overwrite_if_version(&self, expected_version: u64, batch: RecordBatch) -> Result<u64> {
        self.data.overwrite_if_version(expected_version, batch)
    }

    /// Build and publish an index. Waits for any running build of the same
    /// `(column, name)` first.
    pub async fn create_index(&self, descriptor: IndexDescriptor) -> Result<IndexDescriptor> {
        let key = (descriptor.column().to_string(), descriptor.name().to_string());
        let slot = BuildSlot::claim(&self.build_locks, key);
        let _guard = slot.mutex.lock().await;

        let snapshot = self.data.snapshot();
        let store = Arc::clone(&self.indices);
        let table = self.name().to_string();
        let start = Instant::now();
        let built = tokio::task::spawn_blocking(move || {
            IndexBuilder::new(&store).build(snapshot.as_ref(), &descriptor)
        })
        .await
        .map_err(join_error)??;
        tracing::info!(
            "Created index '{}' on {}.{} in {:.1}ms",
            built.name(),
            table,
            built.column(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(built)
    }

    /// Plan a query against the current snapshot.
    ///
    /// Every parameter and schema problem is reported here as `Config`; the
    /// returned stream reads no data until it is first polled.
    pub fn query(&self, spec: QuerySpec) -> Result<BatchStream> {
        let source: Arc<dyn DataSource> = self.data.snapshot();
        let plan = QueryPlan::new(spec, source, &self.indices)?;
        Ok(BatchStream::new(plan.execute()))
    }

    pub fn list_indices(&self) -> Vec<IndexDescriptor> {
        self.indices.list()
    }

    pub fn index_stats(&self, name: &str) -> Result<IndexStats> {
        self.indices.stats(name)
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.indices.drop_index(name)
    }

    /// Persist every index into `dir`. Returns the number of indexes written.
    pub async fn save_indices(&self, dir: impl Into<PathBuf>) -> Result<usize> {
        let dir = dir.into();
        let store = Arc::clone(&self.indices);
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir)?;
            store.save_all(&dir)
        })
        .await
        .map_err(join_error)?
    }

    /// Load every index persisted in `dir`, replacing same-named indexes.
    ///
    /// Each artifact must fit this table's current schema (`Config` otherwise)
    /// and must not collide with a differently named index of the same kind on
    /// the same column (`Conflict`). A failed load changes nothing.
    pub async fn load_indices(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref().to_path_buf();
        let store = Arc::clone(&self.indices);
        let schema = self.schema();
        tokio::task::spawn_blocking(move || store.load_all(&dir, &schema))
            .await
            .map_err(join_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakevec_core::table::{ColumnData, DataType, Field};
    use lakevec_core::{Error, IndexKind};

    fn schema() -> Schema {
        Schema::try_new(vec![
            Field::new("category", DataType::Utf8),
            Field::new("vec", DataType::Vector(4)),
        ])
        .unwrap()
    }

    fn batch(n: usize) -> RecordBatch {
        let values: Vec<f32> = (0..n * 4).map(|i| (i % 17) as f32).collect();
        RecordBatch::try_new(
            schema(),
            vec![
                ColumnData::Utf8((0..n).map(|i| format!("c{}", i % 3)).collect()),
                ColumnData::Vector { dim: 4, values },
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_list_drop() {
        let table = Table::new("t", schema());
        table.add(batch(64)).unwrap();
        let ivf = IndexDescriptor::ivf_pq("vec")
            .num_partitions(4)
            .num_sub_vectors(2)
            .num_bits(4)
            .build()
            .unwrap();
        let built = table.create_index(ivf).await.unwrap();
        assert_eq!(built.name(), "vec_idx");
        table
            .create_index(IndexDescriptor::scalar("category").build().unwrap())
            .await
            .unwrap();

        let kinds: Vec<IndexKind> = table.list_indices().iter().map(|d| d.kind()).collect();
        assert_eq!(kinds.len(), 2);
        assert!(kinds.contains(&IndexKind::Scalar));
        assert_eq!(table.index_stats("vec_idx").unwrap().num_indexed_rows, 64);

        table.drop_index("vec_idx").unwrap();
        assert!(matches!(table.drop_index("vec_idx"), Err(Error::NotFound(_))));
        assert_eq!(table.list_indices().len(), 1);
    }

    #[tokio::test]
    async fn test_query_config_error_is_synchronous() {
        let table = Table::new("t", schema());
        table.add(batch(8)).unwrap();
        let spec = QuerySpec::builder()
            .nearest_to(vec![0.0; 3])
            .build()
            .unwrap();
        assert!(matches!(table.query(spec), Err(Error::Config(_))));
        assert_eq!(table.open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_build_locks_are_released() {
        let table = Table::new("t", schema());
        table.add(batch(32)).unwrap();
        let scalar = || IndexDescriptor::scalar("category").replace(true).build().unwrap();

        table.create_index(scalar()).await.unwrap();
        assert!(table.build_locks.lock().is_empty());

        let missing = IndexDescriptor::scalar("nope").build().unwrap();
        assert!(table.create_index(missing).await.is_err());
        assert!(table.build_locks.lock().is_empty());

        let (a, b) = tokio::join!(table.create_index(scalar()), table.create_index(scalar()));
        a.unwrap();
        b.unwrap();
        assert!(table.build_locks.lock().is_empty());
        assert_eq!(table.list_indices().len(), 1);
    }

    #[tokio::test]
    async fn test_optimistic_write_conflict() {
        let table = Table::new("t", schema());
        let v = table.add(batch(4)).unwrap();
        table.add_if_version(v, batch(4)).unwrap();
        assert!(matches!(
            table.add_if_version(v, batch(4)),
            Err(Error::Conflict(_))
        ));
        assert_eq!(table.count_rows(), 8);
    }
}
