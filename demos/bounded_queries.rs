//! bounded_queries: run many simulated queries without overloading the backend
//!
//! Every query runs on its own thread, but a `SizedWaitGroup` keeps at most
//! `--limit` of them talking to the "database" at once.
//!
//! ```text
//! cargo run --example bounded_queries -- --limit 4 --tasks 50 -v
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use sizedwaitgroup::SizedWaitGroup;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, Level};

/// Run simulated queries with a bounded number in flight
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Maximum queries in flight (0 or negative = unbounded)
    #[arg(short, long, default_value = "4", allow_negative_numbers = true)]
    limit: isize,

    /// Size the group to the number of logical CPUs instead of --limit
    #[arg(long, conflicts_with = "limit")]
    per_cpu: bool,

    /// Number of queries to run
    #[arg(short, long, default_value = "32")]
    tasks: usize,

    /// Simulated duration of each query in milliseconds
    #[arg(long, default_value = "25")]
    work_ms: u64,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn validate(&self) -> Result<()> {
        if self.tasks == 0 {
            anyhow::bail!("--tasks must be at least 1");
        }

        if self.quiet && self.verbose > 0 {
            anyhow::bail!("Cannot use both --quiet and --verbose options");
        }

        Ok(())
    }

    fn log_level(&self) -> Level {
        if self.quiet {
            return Level::ERROR;
        }
        match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

/// Shared bookkeeping for how many queries are running
#[derive(Default)]
struct QueryStats {
    running: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(args.verbose > 1)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    args.validate().context("Invalid arguments")?;

    let group = if args.per_cpu {
        SizedWaitGroup::per_cpu()
    } else {
        SizedWaitGroup::new(args.limit)
    };
    info!("Starting bounded_queries v{}", env!("CARGO_PKG_VERSION"));
    info!("Group size: {}", group.size());
    info!("Queries: {}", args.tasks);
    info!("Work per query: {} ms", args.work_ms);

    let stats = Arc::new(QueryStats::default());
    let work = Duration::from_millis(args.work_ms);
    let started = Instant::now();

    for query in 0..args.tasks {
        // Blocks here once the group is full
        group.add(1);

        let group = group.clone();
        let stats = Arc::clone(&stats);
        thread::Builder::new()
            .name(format!("query-{query}"))
            .spawn(move || {
                let now = stats.running.fetch_add(1, Ordering::SeqCst) + 1;
                stats.peak.fetch_max(now, Ordering::SeqCst);
                debug!(query, running = now, "query started");

                thread::sleep(work);

                stats.running.fetch_sub(1, Ordering::SeqCst);
                stats.finished.fetch_add(1, Ordering::SeqCst);
                group.done();
            })
            .with_context(|| format!("Failed to spawn thread for query {query}"))?;
    }

    group.wait();

    let peak = stats.peak.load(Ordering::SeqCst);
    let finished = stats.finished.load(Ordering::SeqCst);
    info!("All queries finished");
    info!("Queries finished: {}", finished);
    info!("Peak in flight: {}", peak);
    info!("Duration: {:?}", started.elapsed());

    if peak > group.size() {
        anyhow::bail!("Peak concurrency {peak} exceeded group size {}", group.size());
    }
    if finished != args.tasks {
        anyhow::bail!("Only {finished} of {} queries finished", args.tasks);
    }

    Ok(())
}
