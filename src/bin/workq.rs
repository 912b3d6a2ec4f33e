//! workq CLI: run a worker fleet against an in-process coordination service.

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rand::Rng;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use workq::config::Config;
use workq::coord::{Coordinator, MemorySession, MemoryStore};
use workq::telemetry::{TelemetryConfig, init_telemetry};
use workq::{Error, Processor, WorkQueue, WorkerPool};

#[derive(Parser)]
#[command(name = "workq", about = "Distributed work queue over a coordination service")]
struct Cli {
    /// TOML config file; the environment is used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run producers and workers against one in-process store
    Simulate {
        /// Number of worker processes to simulate
        #[arg(long, default_value_t = 3)]
        workers: usize,
        /// Number of work items to submit
        #[arg(long, default_value_t = 20)]
        items: usize,
        /// Per-worker pool size (defaults to the configured concurrency)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Probability that a processing attempt fails
        #[arg(long, default_value_t = 0.1)]
        fail_rate: f64,
        /// Simulated processing time per item, in milliseconds
        #[arg(long, default_value_t = 25)]
        work_ms: u64,
        /// Expire the first worker's session after this many milliseconds
        #[arg(long)]
        crash_after_ms: Option<u64>,
        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Command::Config => cmd_config(&config),
        Command::Simulate {
            workers,
            items,
            concurrency,
            fail_rate,
            work_ms,
            crash_after_ms,
            timeout_secs,
            json,
        } => {
            if !(0.0..=1.0).contains(&fail_rate) {
                anyhow::bail!("--fail-rate must be between 0 and 1, got {fail_rate}");
            }
            let _guard = init_telemetry(TelemetryConfig {
                endpoint: config.otel_endpoint.clone(),
                service_name: "workq".to_string(),
                log_level: config.log_level.clone(),
            })?;
            let plan = Plan {
                workers: workers.max(1),
                items,
                concurrency: concurrency.unwrap_or(config.concurrency),
                fail_rate,
                work: Duration::from_millis(work_ms),
                crash_after: crash_after_ms.map(Duration::from_millis),
                timeout: Duration::from_secs(timeout_secs),
            };
            let summary = cmd_simulate(&config, plan).await?;
            print_summary(&summary, json)
        }
    }
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    println!("Root:          {}", config.queue.root);
    println!("Concurrency:   {}", config.concurrency);
    println!("Rescan:        {:?}", config.queue.rescan_period);
    println!("Wait Recheck:  {:?}", config.queue.wait_recheck);
    println!("Rearm Backoff: {:?}", config.queue.rearm_backoff);
    println!(
        "OTLP:          {}",
        config.otel_endpoint.as_deref().unwrap_or("-")
    );
    println!("Log Level:     {}", config.log_level);
    Ok(())
}

struct Plan {
    workers: usize,
    items: usize,
    concurrency: usize,
    fail_rate: f64,
    work: Duration,
    crash_after: Option<Duration>,
    timeout: Duration,
}

#[derive(Default)]
struct Tally {
    attempts: AtomicU64,
    failures: AtomicU64,
}

struct SimProcessor {
    tally: Arc<Tally>,
    processed: Arc<AtomicU64>,
    fail_rate: f64,
    work: Duration,
}

#[async_trait]
impl Processor for SimProcessor {
    async fn process(&mut self, work_id: &str, payload: &[u8]) -> anyhow::Result<()> {
        self.tally.attempts.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.work).await;

        let fail = rand::thread_rng().gen_bool(self.fail_rate);
        if fail {
            self.tally.failures.fetch_add(1, Ordering::Relaxed);
            anyhow::bail!("simulated failure for {work_id} ({} bytes)", payload.len());
        }
        self.processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Serialize)]
struct Summary {
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    duration_ms: i64,
    drained: bool,
    items: usize,
    attempts: u64,
    failures: u64,
    processed_per_worker: Vec<u64>,
    crashed_worker: Option<usize>,
    remaining: Vec<String>,
}

async fn cmd_simulate(config: &Config, plan: Plan) -> anyhow::Result<Summary> {
    let started_at = Utc::now();
    let store = MemoryStore::new();
    let tally = Arc::new(Tally::default());

    let mut sessions: Vec<Arc<MemorySession>> = Vec::with_capacity(plan.workers);
    let mut handles = Vec::with_capacity(plan.workers);
    let mut processed = Vec::with_capacity(plan.workers);
    for _ in 0..plan.workers {
        let session = Arc::new(store.session());
        let client: Arc<dyn Coordinator> = session.clone();
        let queue = WorkQueue::with_config(client, config.queue.clone())?;

        let count = Arc::new(AtomicU64::new(0));
        let factory = {
            let tally = Arc::clone(&tally);
            let count = Arc::clone(&count);
            let (fail_rate, work) = (plan.fail_rate, plan.work);
            move || SimProcessor {
                tally: Arc::clone(&tally),
                processed: Arc::clone(&count),
                fail_rate,
                work,
            }
        };
        let handle = queue
            .start_processing(factory, WorkerPool::new(plan.concurrency))
            .await
            .context("failed to start worker")?;

        sessions.push(session);
        handles.push(handle);
        processed.push(count);
    }

    let producer = WorkQueue::with_config(Arc::new(store.session()), config.queue.clone())?;
    let ids: Vec<String> = (0..plan.items).map(|i| format!("item-{i:05}")).collect();
    for (i, id) in ids.iter().enumerate() {
        producer.add_work(id, &(i as u64).to_be_bytes()).await?;
    }

    let crashed_worker = plan.crash_after.map(|after| {
        let session = Arc::clone(&sessions[0]);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            session.expire();
        });
        0
    });

    let cancel = CancellationToken::new();
    let deadline = {
        let cancel = cancel.clone();
        let timeout = plan.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel();
        })
    };
    let drained = match producer
        .wait_until_done_cancellable(ids.iter().cloned(), &cancel)
        .await
    {
        Ok(()) => true,
        Err(Error::Cancelled) => false,
        Err(e) => return Err(e.into()),
    };
    deadline.abort();

    let remaining = producer.pending().await?;
    for handle in handles {
        handle.shutdown().await;
    }
    let finished_at = Utc::now();

    Ok(Summary {
        started_at,
        finished_at,
        duration_ms: (finished_at - started_at).num_milliseconds(),
        drained,
        items: plan.items,
        attempts: tally.attempts.load(Ordering::Relaxed),
        failures: tally.failures.load(Ordering::Relaxed),
        processed_per_worker: processed
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect(),
        crashed_worker,
        remaining,
    })
}

fn print_summary(summary: &Summary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!(
        "Started:    {}",
        summary.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("Duration:   {}ms", summary.duration_ms);
    println!("Drained:    {}", if summary.drained { "yes" } else { "no" });
    println!("Items:      {}", summary.items);
    println!("Attempts:   {}", summary.attempts);
    println!("Failures:   {}", summary.failures);
    if let Some(worker) = summary.crashed_worker {
        println!("Crashed:    worker {worker}");
    }
    println!("---");
    println!("{:<8}  PROCESSED", "WORKER");
    for (i, count) in summary.processed_per_worker.iter().enumerate() {
        println!("{i:<8}  {count}");
    }
    if !summary.remaining.is_empty() {
        println!("---");
        println!("Remaining:  {}", summary.remaining.join(", "));
    }
    Ok(())
}
