//! Spillway demo - crawl-style producer/consumer run over the spill queues

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Result};
use clap::Parser;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use spillway::bloom::ScalableBloomFilter;
use spillway::{hash_hex_of, CachedDiskDict, Hashable32Hex, OrderedCachedQueue, SpillwayConfig};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (optional; missing files are ignored)
    #[arg(short, long, default_value = "spillway.toml")]
    config: PathBuf,

    /// URLs to discover, duplicates included
    #[arg(short, long, default_value_t = 5000)]
    urls: usize,

    /// Hosts the URLs are spread over
    #[arg(long, default_value_t = 8)]
    hosts: usize,

    /// Consumer threads
    #[arg(short, long, default_value_t = 4)]
    workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CrawlTask {
    host: String,
    url: String,
}

impl Hashable32Hex for CrawlTask {
    fn hash_hex(&self) -> String {
        hash_hex_of(&self.url)
    }
}

type TaskQueue = OrderedCachedQueue<Option<CrawlTask>>;
type HostCounts = Mutex<CachedDiskDict<String, u64>>;

fn record_visit(counts: &HostCounts, task: CrawlTask) -> spillway::Result<()> {
    let mut counts = counts.lock();
    let seen = counts.get_or(&task.host, 0)?;
    counts.set(task.host, seen + 1)
}

/// Runs until this worker's stop marker arrives. Failed items are logged
/// and skipped so every stop marker is still consumed and `join` returns.
fn consume(queue: &TaskQueue, counts: &HostCounts) -> u64 {
    let mut fetched = 0;
    loop {
        let task = match queue.get() {
            Ok(Some(task)) => task,
            Ok(None) => break,
            Err(err) => {
                // A failed get has already settled its task
                warn!("Skipping unreadable task: {}", err);
                continue;
            }
        };
        match record_visit(counts, task) {
            Ok(()) => fetched += 1,
            Err(err) => warn!("Failed to record visit: {}", err),
        }
        if let Err(err) = queue.task_done() {
            warn!("task_done failed: {}", err);
        }
    }
    if let Err(err) = queue.task_done() {
        warn!("task_done failed: {}", err);
    }
    fetched
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = SpillwayConfig::load_from_path(&args.config)?;
    let db = config.storage.open_database()?;

    info!("Starting spillway demo v{}", env!("CARGO_PKG_VERSION"));
    info!("Database directory: {}", db.path().display());
    info!(
        "Queue '{}' keeps {} items in memory",
        config.queue.name, config.queue.max_in_memory
    );

    let queue: Arc<TaskQueue> = Arc::new(OrderedCachedQueue::from_config(
        &config.queue,
        Arc::clone(&db),
    )?);
    let counts: Arc<HostCounts> = Arc::new(Mutex::new(CachedDiskDict::from_config(
        &config.cache,
        Arc::clone(&db),
    )?));
    let mut seen: ScalableBloomFilter = ScalableBloomFilter::from_config(&config.bloom)?;

    let workers: Vec<_> = (0..args.workers.max(1))
        .map(|_| {
            let queue = Arc::clone(&queue);
            let counts = Arc::clone(&counts);
            thread::spawn(move || consume(&queue, &counts))
        })
        .collect();

    // Every URL is discovered about twice
    let distinct = (args.urls / 2).max(1);
    let hosts = args.hosts.max(1);
    let mut duplicates = 0u64;
    for i in 0..args.urls {
        let page = i % distinct;
        let host = format!("host{}.example", page % hosts);
        let url = format!("http://{host}/page/{page}");
        if seen.add(&url)? {
            duplicates += 1;
            continue;
        }
        queue.put(Some(CrawlTask { host, url }))?;
    }
    for _ in 0..workers.len() {
        queue.put(None)?;
    }

    queue.join();

    let mut fetched = 0;
    for worker in workers {
        fetched += worker
            .join()
            .map_err(|_| anyhow!("worker thread panicked"))?;
    }

    info!(
        "Fetched {} URLs, skipped {} duplicates ({} bloom sub-filters)",
        fetched,
        duplicates,
        seen.filter_count()
    );
    info!(
        "Queue throughput: {:.1} in/min, {:.1} out/min, {} processed",
        queue.get_input_rpm(),
        queue.get_output_rpm(),
        queue.processed_tasks()
    );

    let mut counts = Arc::try_unwrap(counts)
        .map_err(|_| anyhow!("host counts still shared"))?
        .into_inner();
    let mut hosts = counts.keys()?;
    hosts.sort();
    info!(
        "Host cache: {} in memory, {} on disk, {:.0}% memory hits",
        counts.in_memory_len(),
        counts.on_disk_len(),
        counts.stats().memory_hit_ratio() * 100.0
    );
    for host in hosts {
        println!("{host}: {}", counts.get(&host)?);
    }
    counts.cleanup()?;

    let queue = Arc::try_unwrap(queue).map_err(|_| anyhow!("queue still shared"))?;
    queue.cleanup()?;

    Ok(())
}
