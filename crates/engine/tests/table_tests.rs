use lakevec_core::config;
use lakevec_core::index::IndexDescriptor;
use lakevec_core::query::QuerySpec;
use lakevec_core::table::{ColumnData, DataType, Field, RecordBatch, Schema};
use lakevec_core::{Error, MetricType};
use lakevec_engine::Table;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tempfile::TempDir;

fn schema(dim: usize) -> Schema {
    Schema::try_new(vec![
        Field::new("id", DataType::Int64),
        Field::new("category", DataType::Utf8),
        Field::new("vec", DataType::Vector(dim)),
    ])
    .unwrap()
}

fn batch(dim: usize, values: Vec<f32>) -> RecordBatch {
    let n = values.len() / dim;
    RecordBatch::try_new(
        schema(dim),
        vec![
            ColumnData::Int64((0..n as i64).collect()),
            ColumnData::Utf8((0..n).map(|i| format!("c{}", i % 4)).collect()),
            ColumnData::Vector { dim, values },
        ],
    )
    .unwrap()
}

fn random_batch(n: usize, dim: usize, seed: u64) -> RecordBatch {
    let mut rng = StdRng::seed_from_u64(seed);
    let values = (0..n * dim).map(|_| rng.random_range(-1.0..1.0)).collect();
    batch(dim, values)
}

fn random_table(n: usize, dim: usize) -> Table {
    let table = Table::new("items", schema(dim));
    table.add(random_batch(n, dim, 7)).unwrap();
    table
}

fn ivf_pq(partitions: usize, sub_vectors: usize, bits: u8) -> IndexDescriptor {
    IndexDescriptor::ivf_pq("vec")
        .num_partitions(partitions)
        .num_sub_vectors(sub_vectors)
        .num_bits(bits)
        .build()
        .unwrap()
}

fn query_vector(dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect()
}

async fn collect(table: &Table, spec: QuerySpec) -> Vec<RecordBatch> {
    table.query(spec).unwrap().try_collect().await.unwrap()
}

fn ids(batches: &[RecordBatch]) -> Vec<i64> {
    batches
        .iter()
        .flat_map(|b| match b.column_by_name("id") {
            Some(ColumnData::Int64(v)) => v.clone(),
            _ => Vec::new(),
        })
        .collect()
}

fn categories(batches: &[RecordBatch]) -> Vec<String> {
    batches
        .iter()
        .flat_map(|b| match b.column_by_name("category") {
            Some(ColumnData::Utf8(v)) => v.clone(),
            _ => Vec::new(),
        })
        .collect()
}

fn distances(batches: &[RecordBatch]) -> Vec<f32> {
    batches
        .iter()
        .flat_map(|b| match b.column_by_name(config::DISTANCE_COLUMN) {
            Some(ColumnData::Float32(v)) => v.clone(),
            _ => Vec::new(),
        })
        .collect()
}

async fn wait_for_cursors(table: &Table, expected: usize) {
    for _ in 0..400 {
        if table.open_cursors() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("open cursors stayed at {}", table.open_cursors());
}

#[tokio::test]
async fn test_persist_reload_query_matches_in_memory() {
    let dir = TempDir::new().unwrap();
    let table = random_table(600, 8);
    table.create_index(ivf_pq(8, 4, 8)).await.unwrap();
    table
        .create_index(IndexDescriptor::scalar("category").build().unwrap())
        .await
        .unwrap();

    let spec = QuerySpec::builder()
        .nearest_to(query_vector(8, 1))
        .limit(10)
        .nprobes(3)
        .filter("category = 'c2'")
        .build()
        .unwrap();
    let before = collect(&table, spec.clone()).await;
    assert_eq!(table.save_indices(dir.path()).await.unwrap(), 2);

    // Same rows, fresh handle: row ids line up, so the reloaded artifacts apply.
    let reopened = random_table(600, 8);
    assert_eq!(reopened.load_indices(dir.path()).await.unwrap(), 2);
    assert_eq!(reopened.list_indices().len(), 2);
    let after = collect(&reopened, spec).await;

    assert_eq!(ids(&before), ids(&after));
    for (a, b) in distances(&before).iter().zip(distances(&after)) {
        assert!((a - b).abs() < 1e-5, "{a} vs {b}");
    }
}

#[tokio::test]
async fn test_replace_build_is_idempotent() {
    let table = random_table(400, 8);
    let desc = IndexDescriptor::ivf_pq("vec")
        .num_partitions(6)
        .num_sub_vectors(2)
        .num_bits(6)
        .replace(true)
        .build()
        .unwrap();
    let spec = QuerySpec::builder()
        .nearest_to(query_vector(8, 2))
        .limit(8)
        .nprobes(2)
        .build()
        .unwrap();

    table.create_index(desc.clone()).await.unwrap();
    let first = collect(&table, spec.clone()).await;
    table.create_index(desc).await.unwrap();
    let second = collect(&table, spec).await;

    assert_eq!(table.list_indices().len(), 1);
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(distances(&first), distances(&second));
}

#[tokio::test]
async fn test_prefilter_returns_exactly_k_matching_rows() {
    let table = random_table(800, 8);
    table.create_index(ivf_pq(16, 4, 8)).await.unwrap();
    for nprobes in [1, 4, 16] {
        let spec = QuerySpec::builder()
            .nearest_to(query_vector(8, 3))
            .limit(20)
            .nprobes(nprobes)
            .filter("category = 'c3'")
            .build()
            .unwrap();
        let batches = collect(&table, spec).await;
        let cats = categories(&batches);
        assert_eq!(cats.len(), 20, "nprobes={nprobes}");
        assert!(cats.iter().all(|c| c == "c3"));
    }
}

#[tokio::test]
async fn test_prefilter_with_scalar_index_and_few_matches() {
    let table = random_table(300, 8);
    table.create_index(ivf_pq(4, 2, 8)).await.unwrap();
    table
        .create_index(IndexDescriptor::scalar("id").build().unwrap())
        .await
        .unwrap();
    let spec = QuerySpec::builder()
        .nearest_to(query_vector(8, 4))
        .limit(10)
        .nprobes(1)
        .filter("id IN (3, 17, 250)")
        .build()
        .unwrap();
    let mut got = ids(&collect(&table, spec).await);
    got.sort_unstable();
    assert_eq!(got, vec![3, 17, 250]);
}

#[tokio::test]
async fn test_postfilter_drops_from_ranked_candidates() {
    let table = random_table(500, 8);
    table.create_index(ivf_pq(8, 4, 8)).await.unwrap();
    let base = || {
        QuerySpec::builder()
            .nearest_to(query_vector(8, 5))
            .limit(12)
            .nprobes(4)
    };

    let unfiltered = collect(&table, base().build().unwrap()).await;
    let filtered = collect(
        &table,
        base()
            .filter("category = 'c0'")
            .prefilter(false)
            .build()
            .unwrap(),
    )
    .await;

    let expected: Vec<i64> = ids(&unfiltered)
        .into_iter()
        .zip(categories(&unfiltered))
        .filter(|(_, c)| c == "c0")
        .map(|(id, _)| id)
        .collect();
    let got = ids(&filtered);
    assert!(got.len() <= 12);
    assert_eq!(got, expected);
    assert!(categories(&filtered).iter().all(|c| c == "c0"));
}

#[tokio::test]
async fn test_all_partitions_match_brute_force() {
    // 1000 uniform 4-d rows, 10 partitions, 2 sub-vectors of 4 bits: searching
    // every partition must give the exact top 5.
    for seed in 0..5 {
        let indexed = Table::new("uniform", schema(4));
        indexed.add(random_batch(1000, 4, seed)).unwrap();
        indexed.create_index(ivf_pq(10, 2, 4)).await.unwrap();
        let plain = Table::new("uniform", schema(4));
        plain.add(random_batch(1000, 4, seed)).unwrap();

        for q in 0..3 {
            let spec = QuerySpec::builder()
                .nearest_to(query_vector(4, 100 + seed * 10 + q))
                .limit(5)
                .nprobes(10)
                .metric(MetricType::L2)
                .build()
                .unwrap();
            let approx = collect(&indexed, spec.clone()).await;
            let exact = collect(&plain, spec).await;
            assert_eq!(ids(&approx), ids(&exact), "seed {seed}, query {q}");
            assert_eq!(distances(&approx), distances(&exact));
        }
    }
}

#[tokio::test]
async fn test_partitions_capped_by_row_count() {
    let table = random_table(5, 8);
    table.create_index(ivf_pq(64, 4, 8)).await.unwrap();
    let stats = table.index_stats("vec_idx").unwrap();
    assert!(stats.num_partitions.unwrap() <= 5);
    assert_eq!(stats.num_indexed_rows, 5);

    let spec = QuerySpec::builder()
        .nearest_to(query_vector(8, 6))
        .limit(10)
        .build()
        .unwrap();
    assert_eq!(ids(&collect(&table, spec).await).len(), 5);
}

#[tokio::test]
async fn test_empty_table_builds_and_yields_empty_stream() {
    let table = Table::new("empty", schema(8));
    table.create_index(ivf_pq(16, 4, 8)).await.unwrap();
    assert_eq!(table.index_stats("vec_idx").unwrap().num_indexed_rows, 0);

    let spec = QuerySpec::builder()
        .nearest_to(query_vector(8, 7))
        .build()
        .unwrap();
    let mut stream = table.query(spec).unwrap();
    assert!(stream.next().await.unwrap().is_none());
    assert!(stream.is_finished());
}

#[tokio::test]
async fn test_abandoned_stream_releases_cursor() {
    let table = random_table(500, 8);
    let spec = QuerySpec::builder()
        .nearest_to(query_vector(8, 8))
        .limit(100)
        .batch_size(10)
        .build()
        .unwrap();
    let mut stream = table.query(spec.clone()).unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.num_rows(), 10);
    assert_eq!(table.open_cursors(), 1);
    drop(stream);
    wait_for_cursors(&table, 0).await;

    // The table stays queryable.
    let batches = collect(&table, spec).await;
    assert_eq!(batches.len(), 10);
    assert_eq!(ids(&batches).len(), 100);
    wait_for_cursors(&table, 0).await;
}

#[tokio::test]
async fn test_config_errors_surface_before_data_access() {
    let table = random_table(50, 8);

    let bad_dim = IndexDescriptor::ivf_pq("vec").num_sub_vectors(3).build().unwrap();
    assert!(matches!(table.create_index(bad_dim).await, Err(Error::Config(_))));
    let not_vector = IndexDescriptor::ivf_pq("category").build().unwrap();
    assert!(matches!(table.create_index(not_vector).await, Err(Error::Config(_))));
    assert!(table.list_indices().is_empty());

    let unknown_filter = QuerySpec::builder()
        .nearest_to(query_vector(8, 9))
        .filter("price > 3")
        .build()
        .unwrap();
    assert!(matches!(table.query(unknown_filter), Err(Error::Config(_))));
    let unknown_column = QuerySpec::builder()
        .nearest_to(query_vector(8, 9))
        .select(["id", "missing"])
        .build()
        .unwrap();
    assert!(matches!(table.query(unknown_column), Err(Error::Config(_))));
    assert_eq!(table.open_cursors(), 0);
}

#[tokio::test]
async fn test_conflict_leaves_existing_index() {
    let table = random_table(100, 8);
    table.create_index(ivf_pq(4, 4, 8)).await.unwrap();
    let before = table.index_stats("vec_idx").unwrap();

    table.add(random_batch(20, 8, 99)).unwrap();
    let err = table.create_index(ivf_pq(4, 4, 8)).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert!(err.is_retryable());
    assert_eq!(table.index_stats("vec_idx").unwrap(), before);
}

#[tokio::test]
async fn test_corrupt_index_file_is_data_error() {
    let dir = TempDir::new().unwrap();
    let table = random_table(100, 8);
    table.create_index(ivf_pq(4, 4, 8)).await.unwrap();
    table.save_indices(dir.path()).await.unwrap();

    let path = dir.path().join("vec_idx.lvi");
    let mut bytes = std::fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xff;
    std::fs::write(&path, bytes).unwrap();

    let reopened = random_table(100, 8);
    let err = reopened.load_indices(dir.path()).await.unwrap_err();
    assert!(matches!(err, Error::Data(_)));
    assert!(reopened.list_indices().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_builds_of_same_index_are_serialized() {
    let table = random_table(300, 8);
    let desc = ivf_pq(4, 4, 8);
    let (a, b) = tokio::join!(
        table.create_index(desc.clone()),
        table.create_index(desc.clone())
    );
    let conflicts = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(Error::Conflict(_))))
        .count();
    assert_eq!(conflicts, 1);
    assert!(a.is_ok() || b.is_ok());
    assert_eq!(table.list_indices().len(), 1);

    // Different indexes build side by side.
    let scalar = IndexDescriptor::scalar("category").build().unwrap();
    let replace = IndexDescriptor::ivf_pq("vec")
        .num_partitions(4)
        .num_sub_vectors(4)
        .replace(true)
        .build()
        .unwrap();
    let (s, r) = tokio::join!(table.create_index(scalar), table.create_index(replace));
    s.unwrap();
    r.unwrap();
    assert_eq!(table.list_indices().len(), 2);
}

#[tokio::test]
async fn test_rows_added_after_build_are_searched() {
    let table = random_table(200, 8);
    table.create_index(ivf_pq(4, 4, 8)).await.unwrap();
    let target = query_vector(8, 10);
    let row = RecordBatch::try_new(
        schema(8),
        vec![
            ColumnData::Int64(vec![9999]),
            ColumnData::Utf8(vec!["new".into()]),
            ColumnData::Vector {
                dim: 8,
                values: target.clone(),
            },
        ],
    )
    .unwrap();
    table.add(row).unwrap();

    let spec = QuerySpec::builder()
        .nearest_to(target)
        .limit(1)
        .nprobes(1)
        .with_row_id(true)
        .build()
        .unwrap();
    let batches = collect(&table, spec).await;
    assert_eq!(ids(&batches), vec![9999]);
    assert_eq!(
        batches[0].column_by_name(config::ROW_ID_COLUMN),
        Some(&ColumnData::UInt64(vec![200]))
    );
}

fn docs_table(bodies: &[&str]) -> Table {
    let schema = Schema::try_new(vec![
        Field::new("id", DataType::Int64),
        Field::new("body", DataType::Utf8),
    ])
    .unwrap();
    let table = Table::new("docs", schema.clone());
    let batch = RecordBatch::try_new(
        schema,
        vec![
            ColumnData::Int64((0..bodies.len() as i64).collect()),
            ColumnData::Utf8(bodies.iter().map(|b| b.to_string()).collect()),
        ],
    )
    .unwrap();
    table.add(batch).unwrap();
    table
}

const DOCS: [&str; 6] = [
    "async runtimes schedule futures on worker threads",
    "a vector index partitions embeddings into clusters",
    "the borrow checker rejects dangling references",
    "product quantization compresses each vector into short codes",
    "worker pools and async tasks",
    "nothing relevant here",
];

fn scores(batches: &[RecordBatch]) -> Vec<f32> {
    batches
        .iter()
        .flat_map(|b| match b.column_by_name(config::SCORE_COLUMN) {
            Some(ColumnData::Float32(v)) => v.clone(),
            _ => Vec::new(),
        })
        .collect()
}

#[tokio::test]
async fn test_full_text_search_survives_reload() {
    let dir = TempDir::new().unwrap();
    let table = docs_table(&DOCS);
    table
        .create_index(IndexDescriptor::fts("body").build().unwrap())
        .await
        .unwrap();
    let stats = table.index_stats("body_idx").unwrap();
    assert_eq!(stats.num_indexed_rows, 6);
    assert!(stats.num_terms.unwrap() > 20);

    let spec = QuerySpec::builder()
        .full_text("vector")
        .limit(5)
        .build()
        .unwrap();
    let before = collect(&table, spec.clone()).await;
    let mut hits = ids(&before);
    hits.sort_unstable();
    assert_eq!(hits, vec![1, 3]);

    table.save_indices(dir.path()).await.unwrap();
    assert!(dir.path().join("body_idx.lvi").exists());
    let reopened = docs_table(&DOCS);
    assert_eq!(reopened.load_indices(dir.path()).await.unwrap(), 1);
    let after = collect(&reopened, spec).await;
    assert_eq!(ids(&before), ids(&after));
    assert_eq!(scores(&before), scores(&after));

    let filtered = QuerySpec::builder()
        .full_text("async worker")
        .filter("id > 0")
        .build()
        .unwrap();
    assert_eq!(ids(&collect(&reopened, filtered).await), vec![4]);
}

#[tokio::test]
async fn test_full_text_and_vector_query_are_exclusive() {
    let err = QuerySpec::builder()
        .full_text("vector")
        .nearest_to(vec![0.0; 8])
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let table = docs_table(&DOCS);
    let spec = QuerySpec::builder().full_text("vector").build().unwrap();
    assert!(matches!(table.query(spec), Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_load_colliding_index_is_conflict() {
    let dir = TempDir::new().unwrap();
    let source = random_table(100, 8);
    let renamed = IndexDescriptor::scalar("category")
        .name("category_on_disk")
        .build()
        .unwrap();
    source.create_index(renamed).await.unwrap();
    source.save_indices(dir.path()).await.unwrap();

    let table = random_table(100, 8);
    table
        .create_index(IndexDescriptor::scalar("category").build().unwrap())
        .await
        .unwrap();
    let err = table.load_indices(dir.path()).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    let names: Vec<String> = table
        .list_indices()
        .iter()
        .map(|d| d.name().to_string())
        .collect();
    assert_eq!(names, vec!["category_idx"]);
}

#[tokio::test]
async fn test_load_into_other_dimension_is_config_error() {
    let dir = TempDir::new().unwrap();
    let narrow = random_table(200, 4);
    narrow.create_index(ivf_pq(4, 2, 4)).await.unwrap();
    narrow.save_indices(dir.path()).await.unwrap();

    let wide = random_table(200, 8);
    let err = wide.load_indices(dir.path()).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(wide.list_indices().is_empty());
}
