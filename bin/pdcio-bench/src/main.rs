//! PDCIO bench - drives the attribute index and the region cache in process
//!
//! `kvtag` inserts synthetic `key=strNNNstr` tags and times queries against
//! them. `region` pushes adjacent 1-D writes through the write-back cache and
//! reads them back.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pdcio_common::{Config, IndexKey, IndexMode, ObjectId, ReplicaSelection};
use pdcio_index::IndexContext;
use pdcio_region::{CacheContext, MemoryStorage, RegionDescriptor};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_QUERIES: [&str; 5] = [
    "key=str099str",
    "key=str09*",
    "key=*09str",
    "key=*09*",
    "key=str00* OR key=*99str",
];

#[derive(Parser, Debug)]
#[command(name = "pdcio-bench")]
#[command(about = "PDCIO index and region cache benchmark")]
#[command(version)]
struct Args {
    /// TOML configuration file; the environment is used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Insert synthetic tags and run queries against them
    Kvtag {
        /// Number of objects to tag
        #[arg(short = 'n', long, default_value_t = 1000)]
        count: u64,

        #[arg(long)]
        shards: Option<u32>,

        #[arg(long)]
        replication: Option<u32>,

        #[arg(long)]
        affix: Option<usize>,

        /// Index every value on a single shard and broadcast all wildcard queries
        #[arg(long)]
        full_hash: bool,

        /// Rotate affix queries across replicas instead of asking all of them
        #[arg(long)]
        round_robin: bool,

        /// Query or boolean expression; may be repeated
        #[arg(short, long = "query")]
        queries: Vec<String>,

        /// Write shard snapshots here after the run
        #[arg(long)]
        dump_dir: Option<PathBuf>,
    },
    /// Write adjacent regions through the cache and read them back
    Region {
        /// Number of regions to write
        #[arg(short = 'n', long, default_value_t = 1024)]
        count: u64,

        /// Elements per region
        #[arg(long, default_value_t = 4096)]
        elements: u64,

        /// Bytes per element
        #[arg(long, default_value_t = 1)]
        unit: usize,

        #[arg(long)]
        max_cache_bytes: Option<u64>,
    },
}

#[derive(Debug, Serialize)]
struct QueryReport {
    query: String,
    hits: usize,
    micros: u128,
    unreachable_shards: Vec<u32>,
}

#[derive(Debug, Serialize)]
struct KvtagReport {
    inserted: u64,
    insert_micros: u128,
    queries: Vec<QueryReport>,
}

#[derive(Debug, Serialize)]
struct RegionReport {
    regions: u64,
    write_micros: u128,
    read_micros: u128,
    hits: u64,
    misses: u64,
    registered: u64,
    absorbed: u64,
    bypassed: u64,
    flushed_bytes: u64,
    storage_writes: u64,
    storage_reads: u64,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    if let Some(path) = path {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        return toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()));
    }
    if std::env::var_os(pdcio_common::config::ENV_NUM_SHARDS).is_some() {
        return Config::from_env().context("loading config from environment");
    }
    Ok(Config::default())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = load_config(args.config.as_ref())?;

    match args.command {
        Commands::Kvtag {
            count,
            shards,
            replication,
            affix,
            full_hash,
            round_robin,
            queries,
            dump_dir,
        } => {
            if let Some(shards) = shards {
                config.index.num_shards = shards;
            }
            if let Some(replication) = replication {
                config.index.replication_factor = replication;
            }
            if let Some(affix) = affix {
                config.index.affix_len = affix;
            }
            if full_hash {
                config.index.mode = IndexMode::FullHash;
            }
            if round_robin {
                config.index.replica_selection = ReplicaSelection::RoundRobin;
            }
            run_kvtag(config, count, queries, dump_dir, args.json).await
        }
        Commands::Region {
            count,
            elements,
            unit,
            max_cache_bytes,
        } => {
            if let Some(max) = max_cache_bytes {
                config.cache.max_cache_bytes = max;
            }
            run_region(config, count, elements, unit, args.json)
        }
    }
}

async fn run_kvtag(
    config: Config,
    count: u64,
    queries: Vec<String>,
    dump_dir: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let (ctx, transport) = IndexContext::local(config.index).context("building index")?;
    let router = ctx.router();

    let keys = (0..count)
        .map(|i| IndexKey::string("key", format!("str{i:03}str"), i))
        .collect::<Result<Vec<_>, _>>()?;

    let start = Instant::now();
    router.insert_batch(&keys).await.context("inserting tags")?;
    let elapsed = start.elapsed();
    if !json {
        println!(
            "inserted {count} tags in {elapsed:?} ({:.0} tags/s)",
            count as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
        );
    }
    let mut report = KvtagReport {
        inserted: count,
        insert_micros: elapsed.as_micros(),
        queries: Vec::new(),
    };

    let queries = if queries.is_empty() {
        DEFAULT_QUERIES.iter().map(ToString::to_string).collect()
    } else {
        queries
    };

    for query in queries {
        let start = Instant::now();
        let result = router
            .search_expr(&query)
            .await
            .with_context(|| format!("query {query:?}"))?;
        let elapsed = start.elapsed();
        if !json {
            println!(
                "{query:<32} {:>8} hits in {elapsed:?}",
                result.object_ids.len()
            );
        }
        if !result.is_complete() {
            warn!(
                "Query {query:?} missed shards {:?}",
                result.unreachable_shards()
            );
        }
        report.queries.push(QueryReport {
            hits: result.object_ids.len(),
            micros: elapsed.as_micros(),
            unreachable_shards: result.unreachable_shards(),
            query,
        });
    }

    for shard in transport.shards() {
        let stats = shard.stats();
        info!(
            "Shard {}: {} attributes, {} postings",
            shard.shard_id(),
            stats.attributes,
            stats.postings
        );
    }

    if let Some(dir) = dump_dir {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating dump dir {}", dir.display()))?;
        for shard in transport.shards() {
            let path = shard.dump(&dir)?;
            info!("Dumped shard {} to {}", shard.shard_id(), path.display());
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn run_region(config: Config, count: u64, elements: u64, unit: usize, json: bool) -> Result<()> {
    if count == 0 || elements == 0 || unit == 0 {
        bail!("count, elements and unit must all be non-zero");
    }
    let storage = Arc::new(MemoryStorage::new());
    let ctx = CacheContext::start(config.cache, storage.clone())?;
    let cache = ctx.cache();
    let object = ObjectId::new(1);

    let start = Instant::now();
    for i in 0..count {
        let region = RegionDescriptor::linear(i * elements, elements)?;
        let data = vec![(i % 251) as u8; (elements as usize) * unit];
        cache.write(object, &region, &data, unit)?;
    }
    let write_time = start.elapsed();

    let start = Instant::now();
    for i in 0..count {
        let region = RegionDescriptor::linear(i * elements, elements)?;
        let data = cache.read(object, &region, unit)?;
        if data.iter().any(|&b| b != (i % 251) as u8) {
            bail!("region {region} read back wrong data");
        }
    }
    let read_time = start.elapsed();

    cache.flush_all()?;
    let stats = cache.stats();
    let report = RegionReport {
        regions: count,
        write_micros: write_time.as_micros(),
        read_micros: read_time.as_micros(),
        hits: stats.hits.load(Ordering::Relaxed),
        misses: stats.misses.load(Ordering::Relaxed),
        registered: stats.registered.load(Ordering::Relaxed),
        absorbed: stats.absorbed.load(Ordering::Relaxed),
        bypassed: stats.bypassed.load(Ordering::Relaxed),
        flushed_bytes: stats.flushed_bytes.load(Ordering::Relaxed),
        storage_writes: storage.write_count(),
        storage_reads: storage.read_count(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("wrote {count} regions in {write_time:?}, read back in {read_time:?}");
        println!(
            "hits {} misses {} (ratio {:.2}), registered {}, absorbed {}, bypassed {}",
            report.hits,
            report.misses,
            stats.hit_ratio(),
            report.registered,
            report.absorbed,
            report.bypassed,
        );
        println!(
            "storage writes {} ({} flushed bytes), storage reads {}",
            report.storage_writes, report.flushed_bytes, report.storage_reads
        );
    }

    ctx.shutdown()?;
    Ok(())
}
