use clap::{Parser, Subcommand, ValueEnum};
use lakevec_core::config;
use lakevec_core::index::{persistence, IndexDescriptor, IndexStats, IndexStore};
use lakevec_core::query::{QueryPlan, QuerySpec};
use lakevec_core::table::{ColumnData, DataSource, DataType, Field, RecordBatch, Schema};
use lakevec_core::MetricType;
use lakevec_engine::{BatchStream, Table};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lakevec", about = "Embedded vector store with IVF-PQ search")]
struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Plain, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Build indexes over a generated clustered dataset and run a filtered query
    Demo(DemoArgs),
    /// Print statistics of persisted indexes as JSON
    Inspect {
        /// Directory holding `.lvi` index files
        dir: PathBuf,
    },
}

#[derive(clap::Args)]
struct DemoArgs {
    /// Number of rows to generate
    #[arg(long, default_value_t = 10_000)]
    rows: usize,

    /// Vector dimension
    #[arg(long, default_value_t = 32)]
    dim: usize,

    /// Number of generated clusters
    #[arg(long, default_value_t = 16)]
    clusters: usize,

    /// IVF partitions
    #[arg(long, default_value_t = 64)]
    partitions: usize,

    /// PQ sub-vectors (must divide dim)
    #[arg(long, default_value_t = config::DEFAULT_NUM_SUB_VECTORS)]
    sub_vectors: usize,

    /// Bits per PQ code
    #[arg(long, default_value_t = config::DEFAULT_NUM_BITS)]
    bits: u8,

    /// Distance metric (l2, cosine, dot)
    #[arg(long, default_value_t = MetricType::L2)]
    metric: MetricType,

    /// Partitions searched per query
    #[arg(long, default_value_t = config::DEFAULT_NPROBES)]
    nprobes: usize,

    /// Results per query
    #[arg(long, default_value_t = config::DEFAULT_LIMIT)]
    limit: usize,

    /// Candidates re-scored exactly, as a multiple of limit
    #[arg(long, default_value_t = config::DEFAULT_REFINE_FACTOR)]
    refine_factor: f32,

    /// Filter applied to the query
    #[arg(long, default_value = "category = 'c1'")]
    filter: String,

    /// Apply the filter after ranking instead of before
    #[arg(long, default_value_t = false)]
    postfilter: bool,

    /// Seed for data generation and index training
    #[arg(long, default_value_t = config::DEFAULT_SEED)]
    seed: u64,

    /// Save the built indexes to this directory
    #[arg(long)]
    save_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log_format);

    match args.command {
        Command::Demo(demo) => run_demo(demo).await?,
        Command::Inspect { dir } => inspect(dir)?,
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::from_default_env()
        .add_directive(
            "lakevec_engine=info"
                .parse()
                .expect("valid directive literal"),
        )
        .add_directive("lakevec_core=info".parse().expect("valid directive literal"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Plain => builder.init(),
    }
}

fn generate(args: &DemoArgs) -> lakevec_core::Result<RecordBatch> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let centers: Vec<f32> = (0..args.clusters.max(1) * args.dim)
        .map(|_| rng.random_range(-10.0..10.0))
        .collect();
    let mut values = Vec::with_capacity(args.rows * args.dim);
    let mut categories = Vec::with_capacity(args.rows);
    for _ in 0..args.rows {
        let c = rng.random_range(0..args.clusters.max(1));
        for d in 0..args.dim {
            values.push(centers[c * args.dim + d] + rng.random_range(-1.0..1.0));
        }
        categories.push(format!("c{}", c % 4));
    }
    RecordBatch::try_new(
        demo_schema(args.dim)?,
        vec![
            ColumnData::Int64((0..args.rows as i64).collect()),
            ColumnData::Utf8(categories),
            ColumnData::Vector {
                dim: args.dim,
                values,
            },
        ],
    )
}

fn demo_schema(dim: usize) -> lakevec_core::Result<Schema> {
    Schema::try_new(vec![
        Field::new("id", DataType::Int64),
        Field::new("category", DataType::Utf8),
        Field::new("vector", DataType::Vector(dim)),
    ])
}

async fn run_demo(args: DemoArgs) -> Result<(), Box<dyn std::error::Error>> {
    let table = Table::new("demo", demo_schema(args.dim)?);
    table.add(generate(&args)?)?;
    println!("Generated {} rows of dimension {}", table.count_rows(), args.dim);

    let ivf = IndexDescriptor::ivf_pq("vector")
        .metric(args.metric)
        .num_partitions(args.partitions)
        .num_sub_vectors(args.sub_vectors)
        .num_bits(args.bits)
        .seed(args.seed)
        .build()?;
    let scalar = IndexDescriptor::scalar("category").build()?;
    let start = Instant::now();
    tokio::try_join!(table.create_index(ivf), table.create_index(scalar))?;
    println!("Built indexes in {:.2}s", start.elapsed().as_secs_f64());
    for name in table.list_indices().iter().map(|d| d.name().to_string()) {
        println!("{}", serde_json::to_string(&table.index_stats(&name)?)?);
    }

    let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(1));
    let query: Vec<f32> = (0..args.dim).map(|_| rng.random_range(-10.0..10.0)).collect();
    let spec = QuerySpec::builder()
        .nearest_to(query)
        .limit(args.limit)
        .nprobes(args.nprobes)
        .refine_factor(args.refine_factor)
        .metric(args.metric)
        .filter(args.filter.as_str())
        .prefilter(!args.postfilter)
        .select(["id", "category"])
        .build()?;

    let start = Instant::now();
    let batches = table.query(spec.clone())?.try_collect().await?;
    let elapsed = start.elapsed();
    println!();
    println!("  rank |   row |  category | distance");
    println!("  -----+-------+-----------+---------");
    let mut rank = 0;
    let mut found = Vec::new();
    for batch in &batches {
        let categories = batch.column_by_name("category");
        let distances = batch.column_by_name(config::DISTANCE_COLUMN);
        for (i, row_id) in batch.row_ids().iter().enumerate() {
            rank += 1;
            found.push(*row_id);
            let category = categories.and_then(|c| c.value(i)).map(|v| v.to_string());
            let distance = distances.and_then(|c| c.value(i)).map(|v| v.to_string());
            println!(
                "  {:>4} | {:>5} | {:>9} | {}",
                rank,
                row_id,
                category.unwrap_or_default(),
                distance.unwrap_or_default()
            );
        }
    }
    println!("Query took {:.2}ms", elapsed.as_secs_f64() * 1000.0);

    // Exact answer from the same snapshot without any index.
    let source: Arc<dyn DataSource> = table.data().snapshot();
    let exact = QueryPlan::new(spec, source, &IndexStore::new())?;
    let truth: HashSet<u64> = BatchStream::new(exact.execute())
        .try_collect()
        .await?
        .iter()
        .flat_map(|b| b.row_ids().to_vec())
        .collect();
    if !truth.is_empty() {
        let hits = found.iter().filter(|id| truth.contains(id)).count();
        println!(
            "Recall@{} vs brute force: {:.3}",
            args.limit,
            hits as f64 / truth.len() as f64
        );
    }

    if let Some(dir) = args.save_dir {
        let n = table.save_indices(&dir).await?;
        println!("Saved {} indexes to {}", n, dir.display());
    }
    Ok(())
}

fn inspect(dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let artifacts = persistence::load_dir(&dir)?;
    if artifacts.is_empty() {
        eprintln!("No indexes found in {}", dir.display());
        return Ok(());
    }
    for artifact in &artifacts {
        let stats = IndexStats::of(artifact);
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}
