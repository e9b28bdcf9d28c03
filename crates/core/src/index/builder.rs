//! Index build: sample, train, then stream-encode every row.
//!
//! Builds read one [`DataSource`] snapshot from start to finish. Only the
//! training sample is held in memory; the encoding pass streams the table in
//! bounded batches. Nothing is published unless the whole build succeeds.

use crate::config;
use crate::distance::{normalize_in_place, MetricType};
use crate::error::{Error, Result};
use crate::fts::InvertedIndex;
use crate::index::descriptor::{IndexDescriptor, IndexParams, IvfPqParams};
use crate::index::ivf_pq::IvfPqIndex;
use crate::index::scalar::ScalarIndex;
use crate::index::store::IndexStore;
use crate::index::{IndexArtifact, IndexData};
use crate::ivf::IvfCentroids;
use crate::quantization::pq::{self, PqCodebook};
use crate::table::schema::DataType;
use crate::table::source::DataSource;
use rand::rngs::StdRng;
use rand::SeedableRng;
use roaring::RoaringTreemap;
use std::time::Instant;

/// Builds index artifacts and publishes them into a store.
#[derive(Debug, Clone, Copy)]
pub struct IndexBuilder<'a> {
    store: &'a IndexStore,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(store: &'a IndexStore) -> Self {
        Self { store }
    }

    /// Build the index described by `descriptor` over `source` and publish it.
    ///
    /// Fails with `Config` for an unsuitable column or parameters, `Conflict`
    /// when an index already exists and `replace` is unset, and `Data` when the
    /// scan fails midway; in every failure case the store is unchanged.
    pub fn build(
        &self,
        source: &dyn DataSource,
        descriptor: &IndexDescriptor,
    ) -> Result<IndexDescriptor> {
        validate(source, descriptor)?;
        self.store.check_conflict(descriptor)?;
        let artifact = train(source, descriptor)?;
        self.store.publish(artifact)?;
        Ok(descriptor.clone())
    }
}

/// Check the descriptor against the table schema without reading any rows.
pub fn validate(source: &dyn DataSource, descriptor: &IndexDescriptor) -> Result<()> {
    let field = source.schema().require(descriptor.column())?;
    match (descriptor.params(), field.data_type) {
        (IndexParams::IvfPq(p), DataType::Vector(dim)) => {
            pq::validate_params(dim, p.num_sub_vectors, p.num_bits)
        }
        (IndexParams::IvfPq(_), other) => Err(Error::config(format!(
            "IVF_PQ index requires a vector column, '{}' is {other}",
            descriptor.column()
        ))),
        (IndexParams::Scalar, DataType::Vector(_)) => Err(Error::config(format!(
            "scalar index requires a scalar column, '{}' is a vector column",
            descriptor.column()
        ))),
        (IndexParams::Scalar, _) => Ok(()),
        (IndexParams::Fts, DataType::Utf8) => Ok(()),
        (IndexParams::Fts, other) => Err(Error::config(format!(
            "FTS index requires a Utf8 column, '{}' is {other}",
            descriptor.column()
        ))),
    }
}

/// Build an artifact without publishing it.
pub fn train(source: &dyn DataSource, descriptor: &IndexDescriptor) -> Result<IndexArtifact> {
    validate(source, descriptor)?;
    let start = Instant::now();
    let data_type = source.schema().require(descriptor.column())?.data_type;
    let (covered, data) = match (descriptor.params(), data_type) {
        (IndexParams::IvfPq(params), DataType::Vector(dim)) => {
            build_ivf_pq(source, descriptor.column(), dim, params)?
        }
        (IndexParams::Fts, _) => build_fts(source, descriptor.column())?,
        _ => build_scalar(source, descriptor.column(), data_type)?,
    };
    tracing::info!(
        "Built {} index '{}' on '{}' ({} rows, table version {}) in {:?}",
        descriptor.kind(),
        descriptor.name(),
        descriptor.column(),
        covered.len(),
        source.version(),
        start.elapsed()
    );
    Ok(IndexArtifact {
        descriptor: descriptor.clone(),
        table_version: source.version(),
        covered,
        data,
    })
}

fn build_ivf_pq(
    source: &dyn DataSource,
    column: &str,
    dim: usize,
    params: &IvfPqParams,
) -> Result<(RoaringTreemap, IndexData)> {
    let sample = training_sample(source, column, dim, params)?;
    let n_sample = sample.len() / dim;
    tracing::debug!(
        "Training IVF_PQ on '{}': {} sample rows, {} partitions, {} sub-vectors, {} bits",
        column,
        n_sample,
        params.num_partitions,
        params.num_sub_vectors,
        params.num_bits
    );

    let ivf = IvfCentroids::train(
        &sample,
        dim,
        params.num_partitions,
        params.max_iterations,
        params.metric,
        params.seed,
    );
    let codebook = PqCodebook::train(
        &sample,
        dim,
        params.num_sub_vectors,
        params.num_bits,
        params.max_iterations,
        params.seed,
    )?;
    drop(sample);

    let mut index = IvfPqIndex::empty(ivf, codebook);
    let mut covered = RoaringTreemap::new();
    let mut scratch = Vec::with_capacity(dim);
    let columns = [column.to_string()];
    for batch in source.scan(&columns, config::SCAN_BATCH_SIZE)? {
        let batch = batch?;
        let col = batch.column(0);
        for (i, &row_id) in batch.row_ids().iter().enumerate() {
            let v = col
                .vector(i)
                .ok_or_else(|| Error::data(format!("column '{column}' returned non-vector data")))?;
            index.insert(row_id, v, &mut scratch);
            covered.insert(row_id);
        }
    }
    Ok((covered, IndexData::IvfPq(index)))
}

/// Collect the training sample as a contiguous arena.
///
/// The sample size is `ceil(rows * sample_rate)`, raised to at least
/// `min(rows, num_partitions)` so every requested partition can be seeded.
/// Row positions are drawn with a seeded RNG, so the sample is reproducible.
/// Cosine samples are unit-normalized.
fn training_sample(
    source: &dyn DataSource,
    column: &str,
    dim: usize,
    params: &IvfPqParams,
) -> Result<Vec<f32>> {
    let rows = source.row_count() as usize;
    let wanted = ((rows as f64 * params.sample_rate).ceil() as usize)
        .max(params.num_partitions.min(rows))
        .min(rows);

    // Sorted row positions (ordinal within the scan, not row ids).
    let positions: Option<Vec<usize>> = if wanted >= rows {
        None
    } else {
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut picked = rand::seq::index::sample(&mut rng, rows, wanted).into_vec();
        picked.sort_unstable();
        Some(picked)
    };

    let mut sample = Vec::with_capacity(wanted * dim);
    let mut ordinal = 0usize;
    let mut next_pick = 0usize;
    let columns = [column.to_string()];
    for batch in source.scan(&columns, config::SCAN_BATCH_SIZE)? {
        let batch = batch?;
        let col = batch.column(0);
        for i in 0..batch.num_rows() {
            let take = match &positions {
                None => true,
                Some(p) => {
                    if p.get(next_pick) == Some(&ordinal) {
                        next_pick += 1;
                        true
                    } else {
                        false
                    }
                }
            };
            ordinal += 1;
            if !take {
                continue;
            }
            let v = col
                .vector(i)
                .ok_or_else(|| Error::data(format!("column '{column}' returned non-vector data")))?;
            let start = sample.len();
            sample.extend_from_slice(v);
            if params.metric == MetricType::Cosine {
                normalize_in_place(&mut sample[start..]);
            }
        }
        if positions.as_ref().is_some_and(|p| next_pick >= p.len()) {
            break;
        }
    }
    Ok(sample)
}

fn build_scalar(
    source: &dyn DataSource,
    column: &str,
    data_type: DataType,
) -> Result<(RoaringTreemap, IndexData)> {
    let mut index = ScalarIndex::new(data_type);
    let mut covered = RoaringTreemap::new();
    let columns = [column.to_string()];
    for batch in source.scan(&columns, config::SCAN_BATCH_SIZE)? {
        let batch = batch?;
        let col = batch.column(0);
        for (i, &row_id) in batch.row_ids().iter().enumerate() {
            let value = col
                .value(i)
                .ok_or_else(|| Error::data(format!("column '{column}' returned non-scalar data")))?;
            index.insert(value, row_id);
            covered.insert(row_id);
        }
    }
    Ok((covered, IndexData::Scalar(index)))
}

fn build_fts(source: &dyn DataSource, column: &str) -> Result<(RoaringTreemap, IndexData)> {
    let mut index = InvertedIndex::new();
    let mut covered = RoaringTreemap::new();
    let columns = [column.to_string()];
    for batch in source.scan(&columns, config::SCAN_BATCH_SIZE)? {
        let batch = batch?;
        let col = batch.column(0);
        for (i, &row_id) in batch.row_ids().iter().enumerate() {
            let text = col
                .text(i)
                .ok_or_else(|| Error::data(format!("column '{column}' returned non-text data")))?;
            index.add_document(row_id, text);
            covered.insert(row_id);
        }
    }
    tracing::debug!(
        "Indexed {} documents, {} distinct terms on '{}'",
        index.num_documents(),
        index.num_terms(),
        column
    );
    Ok((covered, IndexData::Fts(index)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::descriptor::IndexKind;
    use crate::table::batch::{ColumnData, RecordBatch};
    use crate::table::mem_table::MemTable;
    use crate::table::schema::{Field, Schema};
    use crate::table::source::{BatchIter, Cursor};
    use rand::Rng;

    fn schema() -> Schema {
        Schema::try_new(vec![
            Field::new("id", DataType::Int64),
            Field::new("vec", DataType::Vector(4)),
        ])
        .unwrap()
    }

    fn table(n: usize) -> MemTable {
        let t = MemTable::new("t", schema());
        if n > 0 {
            let mut rng = StdRng::seed_from_u64(7);
            let values: Vec<f32> = (0..n * 4).map(|_| rng.random_range(-1.0..1.0)).collect();
            let batch = RecordBatch::try_new(
                schema(),
                vec![
                    ColumnData::Int64((0..n as i64).collect()),
                    ColumnData::Vector { dim: 4, values },
                ],
            )
            .unwrap();
            t.append(batch).unwrap();
        }
        t
    }

    fn ivf_desc() -> IndexDescriptor {
        IndexDescriptor::ivf_pq("vec")
            .num_partitions(4)
            .num_sub_vectors(2)
            .num_bits(4)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_ivf_pq_covers_every_row() {
        let t = table(200);
        let store = IndexStore::new();
        IndexBuilder::new(&store)
            .build(t.snapshot().as_ref(), &ivf_desc())
            .unwrap();
        let artifact = store.find("vec", IndexKind::IvfPq).unwrap();
        assert_eq!(artifact.covered.len(), 200);
        assert_eq!(artifact.table_version, t.version());
        let idx = artifact.as_ivf_pq().unwrap();
        assert_eq!(idx.num_partitions(), 4);
        assert_eq!(idx.num_rows(), 200);
    }

    #[test]
    fn test_build_is_deterministic() {
        let t = table(300);
        let snap = t.snapshot();
        let desc = IndexDescriptor::ivf_pq("vec")
            .num_partitions(8)
            .num_sub_vectors(2)
            .num_bits(4)
            .sample_rate(0.5)
            .build()
            .unwrap();
        let a = train(snap.as_ref(), &desc).unwrap();
        let b = train(snap.as_ref(), &desc).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_partitions_capped_by_rows() {
        let t = table(5);
        let desc = IndexDescriptor::ivf_pq("vec")
            .num_partitions(64)
            .num_sub_vectors(2)
            .num_bits(4)
            .build()
            .unwrap();
        let artifact = train(t.snapshot().as_ref(), &desc).unwrap();
        let idx = artifact.as_ivf_pq().unwrap();
        assert!(idx.num_partitions() <= 5);
        assert_eq!(idx.num_rows(), 5);
    }

    #[test]
    fn test_empty_table_builds_empty_index() {
        let t = table(0);
        let artifact = train(t.snapshot().as_ref(), &ivf_desc()).unwrap();
        assert!(artifact.covered.is_empty());
        assert_eq!(artifact.as_ivf_pq().unwrap().num_rows(), 0);
    }

    #[test]
    fn test_column_validation() {
        let t = table(10);
        let snap = t.snapshot();
        let wrong_kind = IndexDescriptor::ivf_pq("id").build().unwrap();
        assert!(matches!(train(snap.as_ref(), &wrong_kind), Err(Error::Config(_))));
        let scalar_on_vec = IndexDescriptor::scalar("vec").build().unwrap();
        assert!(matches!(train(snap.as_ref(), &scalar_on_vec), Err(Error::Config(_))));
        let missing = IndexDescriptor::scalar("nope").build().unwrap();
        assert!(matches!(train(snap.as_ref(), &missing), Err(Error::Config(_))));
        let bad_split = IndexDescriptor::ivf_pq("vec").num_sub_vectors(3).build().unwrap();
        assert!(matches!(train(snap.as_ref(), &bad_split), Err(Error::Config(_))));
    }

    #[test]
    fn test_scalar_build() {
        let t = table(50);
        let desc = IndexDescriptor::scalar("id").build().unwrap();
        let artifact = train(t.snapshot().as_ref(), &desc).unwrap();
        let idx = artifact.as_scalar().unwrap();
        assert_eq!(idx.num_distinct(), 50);
        assert_eq!(idx.num_rows(), 50);
    }

    #[test]
    fn test_fts_build() {
        let schema = Schema::try_new(vec![
            Field::new("body", DataType::Utf8),
            Field::new("id", DataType::Int64),
        ])
        .unwrap();
        let t = MemTable::new("docs", schema.clone());
        let batch = RecordBatch::try_new(
            schema,
            vec![
                ColumnData::Utf8(vec![
                    "rust ownership rules".into(),
                    "python scripting".into(),
                    "".into(),
                ]),
                ColumnData::Int64(vec![1, 2, 3]),
            ],
        )
        .unwrap();
        t.append(batch).unwrap();
        let snap = t.snapshot();

        let desc = IndexDescriptor::fts("body").build().unwrap();
        let artifact = train(snap.as_ref(), &desc).unwrap();
        assert_eq!(artifact.covered.len(), 3);
        let idx = artifact.as_fts().unwrap();
        assert_eq!(idx.num_documents(), 3);
        assert_eq!(idx.document_frequency("rust"), 1);

        let on_int = IndexDescriptor::fts("id").build().unwrap();
        assert!(matches!(train(snap.as_ref(), &on_int), Err(Error::Config(_))));
    }

    /// Yields one good batch, then fails.
    struct FailingSource {
        inner: std::sync::Arc<crate::table::mem_table::TableSnapshot>,
    }

    impl DataSource for FailingSource {
        fn schema(&self) -> &Schema {
            self.inner.schema()
        }
        fn version(&self) -> u64 {
            self.inner.version()
        }
        fn row_count(&self) -> u64 {
            self.inner.row_count()
        }
        fn live_rows(&self) -> RoaringTreemap {
            self.inner.live_rows()
        }
        fn scan(&self, columns: &[String], batch_size: usize) -> Result<BatchIter<'_>> {
            let first = self.inner.scan(columns, batch_size)?.next();
            Ok(Box::new(
                first
                    .into_iter()
                    .chain(std::iter::once(Err(Error::data("disk read failed")))),
            ))
        }
        fn take(&self, row_ids: &[u64], columns: &[String]) -> Result<RecordBatch> {
            self.inner.take(row_ids, columns)
        }
        fn cursor(&self) -> Cursor {
            Cursor::untracked()
        }
    }

    #[test]
    fn test_mid_scan_failure_publishes_nothing() {
        let t = table(100);
        let source = FailingSource {
            inner: t.snapshot(),
        };
        let store = IndexStore::new();
        let err = IndexBuilder::new(&store)
            .build(&source, &ivf_desc())
            .unwrap_err();
        assert!(matches!(err, Error::Data(_)));
        assert!(store.is_empty());
    }
}
