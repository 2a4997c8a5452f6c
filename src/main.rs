//! CLI interface for the vector engine

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::warn;
use vectordb_engine::config::env_or_default;
use vectordb_engine::telemetry::{init_tracing, LogFormat};
use vectordb_engine::{
    DistanceMetric, EngineConfig, Filter, HnswParams, IndexKind, IngestItem, Metadata,
    QueryRequest, Vector, VectorEngine,
};

#[derive(Parser)]
#[command(name = "vectordb")]
#[command(about = "Embedding-backed vector similarity search engine", long_about = None)]
struct Cli {
    /// Data directory for persistence. Defaults to VECTORDB_DATA_DIR.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Distance metric for a new store (an existing store keeps its own)
    #[arg(long)]
    metric: Option<DistanceMetric>,

    /// Index type to build snapshots with
    #[arg(long, value_enum)]
    index: Option<IndexType>,

    /// HNSW search breadth; higher raises recall at the cost of latency
    #[arg(long)]
    ef_search: Option<usize>,

    /// Log output format (pretty or json). Defaults to VECTORDB_LOG_FORMAT.
    #[arg(long)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy)]
enum IndexType {
    Flat,
    Hnsw,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert or update a vector
    Ingest {
        /// Record ID
        id: String,
        /// Vector data as comma-separated values (e.g., "1.0,2.0,3.0")
        #[arg(short, long)]
        vector: String,
        /// Metadata as a JSON object (e.g., '{"lang":"en"}')
        #[arg(short, long)]
        metadata: Option<String>,
    },
    /// Ingest a JSON array of {"id", "vector", "metadata"} objects
    Load {
        /// Path to the JSON file
        path: PathBuf,
    },
    /// Remove a record
    Remove {
        /// Record ID to remove
        id: String,
    },
    /// Show one record
    Get {
        /// Record ID
        id: String,
    },
    /// Search for similar vectors
    Search {
        /// Query vector as comma-separated values (e.g., "1.0,2.0,3.0")
        query: String,
        /// Number of results to return
        #[arg(short, long, default_value = "5")]
        k: usize,
        /// Only return records whose metadata KEY equals VALUE (KEY=VALUE)
        #[arg(long = "where")]
        filter: Option<String>,
        /// Extra candidates ranked before the filter runs
        #[arg(long, default_value = "0")]
        overfetch: usize,
    },
    /// Show engine status
    Status,
    /// Force a full index rebuild
    Rebuild,
}

fn build_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env().context("reading VECTORDB_* environment")?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if let Some(metric) = cli.metric {
        config.metric = metric;
    }
    match cli.index {
        Some(IndexType::Flat) => config.index = IndexKind::Exact,
        Some(IndexType::Hnsw) => {
            if !matches!(config.index, IndexKind::Hnsw(_)) {
                config.index = IndexKind::Hnsw(HnswParams::default());
            }
        }
        None => {}
    }
    if let (Some(ef), IndexKind::Hnsw(params)) = (cli.ef_search, &mut config.index) {
        params.ef_search = ef;
    }
    config.validate()?;
    Ok(config)
}

fn parse_filter(raw: &str) -> Result<Filter> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("filter must look like KEY=VALUE, got '{}'", raw);
    };
    let value: serde_json::Value =
        serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::from(value));
    let value = vectordb_engine::MetadataValue::try_from(&value)
        .map_err(|reason| anyhow::anyhow!("invalid filter value: {}", reason))?;
    Ok(Filter::Eq(key.trim().to_string(), value))
}

fn parse_metadata(raw: Option<&str>) -> Result<Metadata> {
    match raw {
        None => Ok(Metadata::new()),
        Some(raw) => {
            let json: serde_json::Value = serde_json::from_str(raw).context("metadata is not valid JSON")?;
            Ok(Metadata::from_json(&json)?)
        }
    }
}

fn load_items(path: &Path) -> Result<Vec<IngestItem>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let rows: Vec<serde_json::Value> = serde_json::from_str(&text).context("expected a JSON array")?;
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let id = row["id"]
                .as_str()
                .with_context(|| format!("row {}: missing string \"id\"", i))?;
            let vector: Vec<f32> = serde_json::from_value(row["vector"].clone())
                .with_context(|| format!("row {}: \"vector\" must be an array of numbers", i))?;
            let metadata = Metadata::from_json(&row["metadata"])?;
            Ok(IngestItem::new(id, vector, metadata))
        })
        .collect()
}

fn run(engine: &VectorEngine, command: Commands) -> Result<()> {
    match command {
        Commands::Ingest {
            id,
            vector,
            metadata,
        } => {
            let v = Vector::from_str(&vector)?;
            let version = engine.ingest(&id, v, parse_metadata(metadata.as_deref())?)?;
            println!("Ingested {} (version {})", id, version);
        }
        Commands::Load { path } => {
            let items = load_items(&path)?;
            let versions = engine.ingest_batch(items)?;
            println!("Loaded {} records", versions.len());
        }
        Commands::Remove { id } => {
            if engine.remove(&id)? {
                println!("Removed {}", id);
            } else {
                println!("No record with ID: {}", id);
            }
        }
        Commands::Get { id } => {
            let record = engine.get(&id)?;
            let out = json!({
                "id": record.id,
                "version": record.version,
                "vector": record.vector.as_slice(),
                "metadata": record.metadata.to_json(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Search {
            query,
            k,
            filter,
            overfetch,
        } => {
            let mut request = QueryRequest::new(Vector::from_str(&query)?, k).with_overfetch(overfetch);
            if let Some(raw) = filter {
                request = request.with_filter(parse_filter(&raw)?);
            }
            // A one-shot process cannot wait for the background build.
            engine.rebuild_now()?;
            let response = engine.query(&request)?;

            if response.is_empty() {
                println!("No results found (state: {})", response.state);
            } else {
                println!("Top {} results:", response.len());
                for (i, hit) in response.hits.iter().enumerate() {
                    println!(
                        "{}. {} (distance: {:.4}) {}",
                        i + 1,
                        hit.id,
                        hit.distance,
                        hit.metadata.to_json()
                    );
                }
            }
        }
        Commands::Status => {
            let status = engine.status();
            let out = json!({
                "state": status.state.as_str(),
                "record_count": status.record_count,
                "snapshot_age_ms": status.snapshot_age.map(|d| d.as_millis() as u64),
                "snapshot_records": status.snapshot_records,
                "pending_deltas": status.pending_deltas,
                "degraded": status.degraded,
                "last_rebuild_error": status.last_rebuild_error,
                "stats": status.stats,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Rebuild => match engine.rebuild_now()? {
            Some(report) => println!(
                "Published generation {} with {} records in {:?}",
                report.generation, report.records, report.elapsed
            ),
            None => println!("Nothing to rebuild"),
        },
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_format = match cli.log_format {
        Some(format) => format,
        None => env_or_default("VECTORDB_LOG_FORMAT", "pretty")
            .parse()
            .map_err(anyhow::Error::msg)?,
    };
    init_tracing(log_format);

    let config = build_config(&cli)?;
    if config.data_dir.is_none() {
        warn!("no --data-dir or VECTORDB_DATA_DIR set; nothing will be persisted");
    }

    let engine = VectorEngine::open(config).context("opening vector engine")?;
    let result = run(&engine, cli.command);
    engine.close().context("closing vector engine")?;
    result
}
