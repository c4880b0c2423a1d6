//! ObjectIO Index Bench - bucket index load generator
//!
//! Drives the sharded bucket index through a full lifecycle (init, seed,
//! list, stats, check, rebuild, clean) against the in-memory transport and
//! reports per-phase timings and the peak number of shard operations in
//! flight.

use anyhow::{Context, Result, bail};
use clap::Parser;
use objectio_bucket_index::{BucketIndexService, CallOptions, ListRequest};
use objectio_client::{DirEntry, MemoryTransport, ShardListResult};
use objectio_common::{Bucket, BucketInfo, ConfigHandle, IndexConfig, IndexLayoutGeneration, IndexPool};
use objectio_placement::{ShardFilter, ZonePlacement};
use rand::Rng;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PLACEMENT_RULE: &str = "default-placement";
const DATA_POOL: &str = "default.rgw.buckets.data";

#[derive(Parser, Debug)]
#[command(name = "objectio-index-bench")]
#[command(about = "ObjectIO bucket index load generator")]
#[command(version)]
struct Args {
    /// Number of index shards (0 = unsharded)
    #[arg(long, default_value = "64")]
    shards: u32,

    /// Index layout generation
    #[arg(long, default_value = "0")]
    generation: u64,

    /// Objects seeded into the index
    #[arg(long, default_value = "10000")]
    entries: u64,

    /// Concurrency window; overrides the configured value
    #[arg(long)]
    max_aio: Option<usize>,

    /// Per-shard listing page size
    #[arg(long, default_value = "250")]
    page_size: u32,

    /// Simulated per-operation latency in microseconds
    #[arg(long, default_value = "500")]
    latency_us: u64,

    /// Random extra latency in microseconds
    #[arg(long, default_value = "250")]
    jitter_us: u64,

    /// Use the blocking API from a plain thread instead of the async API
    #[arg(long)]
    blocking: bool,

    /// Directory holding default.{toml,yaml,json}
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Index pool name
    #[arg(long, default_value = "default.rgw.buckets.index")]
    index_pool: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Timing of one lifecycle phase
struct Phase {
    name: &'static str,
    elapsed: Duration,
    detail: String,
}

struct Bench {
    svc: BucketIndexService,
    transport: Arc<MemoryTransport>,
    pool: IndexPool,
    info: BucketInfo,
    opts: CallOptions,
    page_size: u32,
}

impl Bench {
    fn new(args: &Args, config: IndexConfig) -> Self {
        let transport = Arc::new(MemoryTransport::new().with_latency(
            Duration::from_micros(args.latency_us),
            Duration::from_micros(args.jitter_us),
        ));
        let placement = ZonePlacement::single(PLACEMENT_RULE, args.index_pool.clone(), DATA_POOL);
        let svc = BucketIndexService::new(
            transport.clone(),
            Arc::new(placement),
            ConfigHandle::new(config),
        );
        let info = BucketInfo::new(
            Bucket::new("bench"),
            IndexLayoutGeneration::normal(args.generation, args.shards),
        );
        let opts = CallOptions {
            max_aio: args.max_aio,
            ..CallOptions::default()
        };
        Self {
            svc,
            transport,
            pool: IndexPool::new(args.index_pool.clone()),
            info,
            opts,
            page_size: args.page_size,
        }
    }

    /// Write entries straight into the shard objects
    fn seed(&self, entries: u64) -> Result<u64> {
        let mut rng = rand::thread_rng();
        let mut bytes = 0;
        for i in 0..entries {
            let name = format!("obj-{i:08}");
            let (_, target) = self.svc.open_bucket_index_shard(&self.info, &name)?;
            let size = rng.gen_range(1..=1 << 20);
            bytes += size;
            self.transport
                .put_entry(&self.pool, &target.oid, DirEntry::object(name, size))
                .with_context(|| format!("seeding {}", target.oid))?;
        }
        Ok(bytes)
    }

    fn list_request(&self) -> ListRequest {
        ListRequest {
            max_entries: Some(self.page_size),
            ..ListRequest::default()
        }
    }
}

fn count_page(results: &BTreeMap<u32, ShardListResult>) -> (usize, bool) {
    let listed = results.values().map(|r| r.entries.len()).sum();
    let truncated = results.values().any(|r| r.is_truncated);
    (listed, truncated)
}

fn timed<T>(name: &'static str, phases: &mut Vec<Phase>, f: impl FnOnce() -> Result<(T, String)>) -> Result<T> {
    let start = Instant::now();
    let (value, detail) = f()?;
    let elapsed = start.elapsed();
    info!(phase = name, elapsed_ms = elapsed.as_millis(), "{detail}");
    phases.push(Phase { name, elapsed, detail });
    Ok(value)
}

async fn run_async(bench: &Bench, entries: u64) -> Result<Vec<Phase>> {
    let mut phases = Vec::new();
    let svc = &bench.svc;
    let info = &bench.info;
    let layout = &info.layout.current_index;

    let start = Instant::now();
    svc.init_index(info, layout, true, &bench.opts).await?;
    record(&mut phases, "init", start, format!("{} shards", layout.layout.normal.shard_count()));

    timed("seed", &mut phases, || {
        let bytes = bench.seed(entries)?;
        Ok(((), format!("{entries} entries, {bytes} bytes")))
    })?;

    let start = Instant::now();
    let request = bench.list_request();
    let mut results = BTreeMap::new();
    let (mut listed, mut pages) = (0, 0);
    loop {
        svc.list_objects(info, ShardFilter::All, &request, &mut results, &bench.opts)
            .await?;
        let (n, truncated) = count_page(&results);
        listed += n;
        pages += 1;
        if !truncated {
            break;
        }
    }
    record(&mut phases, "list", start, format!("{listed} entries in {pages} rounds"));

    let start = Instant::now();
    let stats = svc.read_stats(info, &bench.opts).await?;
    record(&mut phases, "stats", start, format!("{} objects, {} bytes", stats.count, stats.size));

    let start = Instant::now();
    let checked = svc.check_index(info, &bench.opts).await?;
    let drifted = checked
        .values()
        .filter(|c| c.existing_header != c.calculated_header)
        .count();
    record(&mut phases, "check", start, format!("{drifted} shards drifted"));

    let start = Instant::now();
    svc.rebuild_index(info, &bench.opts).await?;
    record(&mut phases, "rebuild", start, String::new());

    let start = Instant::now();
    svc.clean_index(info, layout, &bench.opts).await?;
    record(&mut phases, "clean", start, String::new());

    verify(listed, entries, stats.count)?;
    Ok(phases)
}

fn run_blocking(bench: &Bench, entries: u64) -> Result<Vec<Phase>> {
    let mut phases = Vec::new();
    let svc = bench.svc.blocking();
    let info = &bench.info;
    let layout = &info.layout.current_index;
    let opts = &bench.opts;

    timed("init", &mut phases, || {
        svc.init_index(info, layout, true, opts)?;
        Ok(((), format!("{} shards", layout.layout.normal.shard_count())))
    })?;

    timed("seed", &mut phases, || {
        let bytes = bench.seed(entries)?;
        Ok(((), format!("{entries} entries, {bytes} bytes")))
    })?;

    let listed = timed("list", &mut phases, || {
        let request = bench.list_request();
        let mut results = BTreeMap::new();
        let (mut listed, mut pages) = (0, 0);
        loop {
            svc.list_objects(info, ShardFilter::All, &request, &mut results, opts)?;
            let (n, truncated) = count_page(&results);
            listed += n;
            pages += 1;
            if !truncated {
                break;
            }
        }
        Ok((listed, format!("{listed} entries in {pages} rounds")))
    })?;

    let stats = timed("stats", &mut phases, || {
        let stats = svc.read_stats(info, opts)?;
        let detail = format!("{} objects, {} bytes", stats.count, stats.size);
        Ok((stats, detail))
    })?;

    timed("check", &mut phases, || {
        let drifted = svc
            .check_index(info, opts)?
            .values()
            .filter(|c| c.existing_header != c.calculated_header)
            .count();
        Ok(((), format!("{drifted} shards drifted")))
    })?;

    timed("rebuild", &mut phases, || {
        svc.rebuild_index(info, opts)?;
        Ok(((), String::new()))
    })?;

    timed("clean", &mut phases, || {
        svc.clean_index(info, layout, opts)?;
        Ok(((), String::new()))
    })?;

    verify(listed, entries, stats.count)?;
    Ok(phases)
}

fn record(phases: &mut Vec<Phase>, name: &'static str, start: Instant, detail: String) {
    let elapsed = start.elapsed();
    info!(phase = name, elapsed_ms = elapsed.as_millis(), "{detail}");
    phases.push(Phase { name, elapsed, detail });
}

fn verify(listed: usize, seeded: u64, counted: u64) -> Result<()> {
    if u64::try_from(listed)? != seeded {
        bail!("listed {listed} entries, seeded {seeded}");
    }
    if counted != seeded {
        bail!("stats report {counted} entries, seeded {seeded}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config_dir {
        Some(dir) => IndexConfig::load(dir)?,
        None => IndexConfig::default(),
    };
    info!(
        shards = args.shards,
        entries = args.entries,
        max_aio = args.max_aio.unwrap_or(config.max_aio),
        blocking = args.blocking,
        "Starting ObjectIO index bench"
    );

    let bench = Bench::new(&args, config);
    let phases = if args.blocking {
        run_blocking(&bench, args.entries)?
    } else {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(run_async(&bench, args.entries))?
    };

    println!("{:<10} {:>12}  detail", "phase", "elapsed");
    for phase in &phases {
        println!(
            "{:<10} {:>9.3} ms  {}",
            phase.name,
            phase.elapsed.as_secs_f64() * 1000.0,
            phase.detail
        );
    }
    println!(
        "peak in flight: {} ({} operations total)",
        bench.transport.peak_in_flight(),
        bench.transport.total_calls()
    );
    Ok(())
}
