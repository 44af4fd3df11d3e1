//! `tickgate run`: a reference host.
//!
//! The calling thread plays the designated thread and pumps the dispatcher
//! once per tick. Producer threads queue jobs with mixed priorities into a
//! shared priority queue; a router thread moves them, highest priority
//! first, onto the dispatcher. Every tenth job a producer also makes a
//! blocking `send` to read the current tick. A pool consumer running on a
//! tokio runtime checks resources out of an async pool and places each one
//! through the dispatcher before returning it.

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::Args;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tickgate_concurrency::sync::Descending;
use tickgate_concurrency::{
    AsyncResourcePool, ConcurrentPriorityQueue, DispatcherHandle, MainThreadDispatcher,
    PumpReport, ResourceFactory,
};
use tickgate_core::TickgateConfig;

/// Highest job priority handed out by the producers
const MAX_PRIORITY: u8 = 9;

/// Arguments for `tickgate run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Number of host ticks to simulate before draining
    #[clap(long, default_value_t = 60)]
    pub ticks: usize,

    /// Interval between ticks in milliseconds
    #[clap(long, default_value_t = 16.0)]
    pub tick_ms: f64,

    /// Number of producer threads
    #[clap(long, default_value_t = 4)]
    pub producers: usize,

    /// Jobs queued by each producer
    #[clap(long, default_value_t = 50)]
    pub jobs_per_producer: usize,

    /// Resources the pool consumer checks out
    #[clap(long, default_value_t = 8)]
    pub pool_requests: usize,

    /// Override the pump time budget in milliseconds
    #[clap(long)]
    pub budget_ms: Option<f64>,

    /// Override the pool refill batch size
    #[clap(long)]
    pub batch_size: Option<usize>,

    /// Print the report as JSON
    #[clap(long)]
    pub json: bool,
}

/// A simulated unit of main-thread work
#[derive(Debug, Clone, Copy)]
struct Job {
    producer: usize,
    cost: Duration,
}

/// A pooled resource
#[derive(Debug)]
struct Sprite {
    id: usize,
}

/// Pool activity during a run
#[derive(Debug, Default, Serialize)]
pub struct PoolReport {
    /// Resources checked out by the consumer
    pub requests: usize,
    /// Resources placed through the dispatcher
    pub placed: usize,
    /// Refills started
    pub refills_started: usize,
    /// Refills that failed
    pub refills_failed: usize,
    /// Resources built by the factory
    pub resources_constructed: usize,
    /// Resources left in the buffer
    pub buffered: usize,
}

/// Summary of a run
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    /// Ticks requested
    pub ticks: usize,
    /// Extra ticks needed for producers and the consumer to finish
    pub drain_ticks: usize,
    pub tick_ms: f64,
    pub time_budget_ms: f64,
    pub jobs_submitted: usize,
    pub jobs_executed: usize,
    /// Blocking sends that returned a value
    pub blocking_sends: usize,
    /// Ticks whose pump stopped on the time budget
    pub budget_exhausted_ticks: usize,
    pub max_pump_ms: f64,
    pub avg_pump_ms: f64,
    pub pending_at_shutdown: usize,
    /// Jobs executed, keyed by priority
    pub executed_by_priority: BTreeMap<u8, usize>,
    pub pool: PoolReport,
}

impl RunReport {
    fn record_pump(&mut self, pump: &PumpReport) {
        let ms = pump.elapsed.as_secs_f64() * 1000.0;
        if ms > self.max_pump_ms {
            self.max_pump_ms = ms;
        }
        self.avg_pump_ms += ms;
        if pump.budget_exhausted {
            self.budget_exhausted_ticks += 1;
        }
    }

    fn print(&self) {
        println!("Tickgate run report");
        println!("  Ticks:              {} (+{} draining)", self.ticks, self.drain_ticks);
        println!("  Tick interval:      {:.2}ms", self.tick_ms);
        println!("  Pump budget:        {:.2}ms", self.time_budget_ms);
        println!(
            "  Jobs executed:      {}/{}",
            self.jobs_executed, self.jobs_submitted
        );
        println!("  Blocking sends:     {}", self.blocking_sends);
        println!(
            "  Pump time:          avg {:.3}ms, max {:.3}ms",
            self.avg_pump_ms, self.max_pump_ms
        );
        println!("  Budget exhausted:   {} ticks", self.budget_exhausted_ticks);
        println!("  Executed by priority:");
        for (priority, count) in self.executed_by_priority.iter().rev() {
            println!("    {}: {}", priority, count);
        }
        println!(
            "  Pool:               {} placed, {} refills ({} failed), {} built, {} buffered",
            self.pool.placed,
            self.pool.refills_started,
            self.pool.refills_failed,
            self.pool.resources_constructed,
            self.pool.buffered
        );
    }
}

/// Run the simulation and print its report
pub fn execute(mut config: TickgateConfig, args: RunArgs) -> anyhow::Result<()> {
    if let Some(budget_ms) = args.budget_ms {
        config.dispatcher.time_budget_ms = budget_ms;
    }
    if let Some(batch_size) = args.batch_size {
        config.pool.refill_batch_size = batch_size;
    }
    config.validate().context("Invalid run configuration")?;

    let report = simulate(&config, &args)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print();
    }
    Ok(())
}

fn simulate(config: &TickgateConfig, args: &RunArgs) -> anyhow::Result<RunReport> {
    if !args.tick_ms.is_finite() || args.tick_ms < 0.0 {
        bail!("--tick-ms must be a non-negative number, got {}", args.tick_ms);
    }
    let tick_interval = Duration::from_nanos((args.tick_ms * 1_000_000.0).round() as u64);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("tickgate-pool")
        .enable_time()
        .build()
        .context("Failed to start the pool runtime")?;

    let dispatcher = MainThreadDispatcher::new(&config.dispatcher);
    let queue: Arc<ConcurrentPriorityQueue<Job, u8, Descending>> =
        Arc::new(ConcurrentPriorityQueue::new());

    let current_tick = Arc::new(AtomicUsize::new(0));
    let active_producers = Arc::new(AtomicUsize::new(args.producers));
    let executed = Arc::new(Mutex::new(BTreeMap::new()));

    info!(
        "Starting run: {} ticks, {} producers x {} jobs",
        args.ticks, args.producers, args.jobs_per_producer
    );

    let producers: Vec<_> = (0..args.producers)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            let handle = dispatcher.handle();
            let current_tick = Arc::clone(&current_tick);
            let active = Arc::clone(&active_producers);
            let jobs = args.jobs_per_producer;

            thread::Builder::new()
                .name(format!("producer-{}", producer))
                .spawn(move || {
                    let sends = produce(producer, jobs, &queue, &handle, &current_tick);
                    active.fetch_sub(1, Ordering::SeqCst);
                    sends
                })
        })
        .collect::<std::io::Result<_>>()
        .context("Failed to spawn producer threads")?;

    let router = {
        let queue = Arc::clone(&queue);
        let handle = dispatcher.handle();
        let active = Arc::clone(&active_producers);
        let executed = Arc::clone(&executed);

        thread::Builder::new()
            .name("router".to_string())
            .spawn(move || route(&queue, &handle, &active, &executed))
            .context("Failed to spawn router thread")?
    };

    let pool = AsyncResourcePool::new(SpriteFactory::default(), &config.pool);
    let consumer = runtime.spawn(consume(
        pool.clone(),
        dispatcher.handle(),
        args.pool_requests,
        config.pool.refill_batch_size,
    ));

    let mut report = RunReport {
        ticks: args.ticks,
        tick_ms: args.tick_ms,
        time_budget_ms: config.dispatcher.time_budget_ms,
        jobs_submitted: args.producers * args.jobs_per_producer,
        ..RunReport::default()
    };

    for tick in 0..args.ticks {
        current_tick.store(tick, Ordering::SeqCst);
        tick_once(&dispatcher, &mut report, tick_interval);
    }

    // Keep ticking until every producer, the router and the consumer are done
    let settled = |producers: &[thread::JoinHandle<usize>]| {
        producers.iter().all(|p| p.is_finished())
            && router.is_finished()
            && consumer.is_finished()
            && dispatcher.pending() == 0
    };
    while !settled(&producers) {
        current_tick.store(args.ticks + report.drain_ticks, Ordering::SeqCst);
        tick_once(&dispatcher, &mut report, tick_interval);
        report.drain_ticks += 1;
    }

    let total_ticks = (args.ticks + report.drain_ticks).max(1);
    report.avg_pump_ms /= total_ticks as f64;
    report.pending_at_shutdown = dispatcher.pending();

    for producer in producers {
        report.blocking_sends += producer
            .join()
            .map_err(|_| anyhow::anyhow!("A producer thread panicked"))?;
    }
    router
        .join()
        .map_err(|_| anyhow::anyhow!("The router thread panicked"))?;

    let (requests, placed) = runtime
        .block_on(consumer)
        .context("The pool consumer task failed")??;

    let stats = pool.stats();
    report.pool = PoolReport {
        requests,
        placed,
        refills_started: stats.refills_started,
        refills_failed: stats.refills_failed,
        resources_constructed: stats.resources_constructed,
        buffered: pool.current_count(),
    };

    report.executed_by_priority = std::mem::take(&mut *executed.lock());
    report.jobs_executed = report.executed_by_priority.values().sum();

    dispatcher.shutdown();
    info!("Run finished after {} drain ticks", report.drain_ticks);

    Ok(report)
}

fn tick_once(dispatcher: &MainThreadDispatcher, report: &mut RunReport, interval: Duration) {
    let started = Instant::now();
    let pump = dispatcher.pump();
    report.record_pump(&pump);

    if let Some(rest) = interval.checked_sub(started.elapsed()) {
        thread::sleep(rest);
    }
}

/// Queue `jobs` jobs; returns how many blocking sends succeeded
fn produce(
    producer: usize,
    jobs: usize,
    queue: &ConcurrentPriorityQueue<Job, u8, Descending>,
    handle: &DispatcherHandle,
    current_tick: &Arc<AtomicUsize>,
) -> usize {
    let mut sends = 0;

    for seq in 0..jobs {
        let priority = ((seq * 7 + producer * 3) % (MAX_PRIORITY as usize + 1)) as u8;
        let cost = Duration::from_micros(100 + (seq as u64 % 5) * 200);
        queue.enqueue(Job { producer, cost }, priority);

        if seq % 10 == 9 {
            let tick = Arc::clone(current_tick);
            match handle.send(move || tick.load(Ordering::SeqCst)) {
                Ok(seen) => {
                    debug!("Producer {} synced at tick {}", producer, seen);
                    sends += 1;
                }
                Err(e) => warn!("Producer {} could not sync: {}", producer, e),
            }
        }
    }

    sends
}

/// Move jobs from the priority queue onto the dispatcher
fn route(
    queue: &ConcurrentPriorityQueue<Job, u8, Descending>,
    handle: &DispatcherHandle,
    active_producers: &AtomicUsize,
    executed: &Arc<Mutex<BTreeMap<u8, usize>>>,
) {
    loop {
        while let Some((job, priority)) = queue.try_dequeue() {
            let executed = Arc::clone(executed);
            let posted = handle.post(move || {
                thread::sleep(job.cost);
                *executed.lock().entry(priority).or_insert(0) += 1;
            });
            if let Err(e) = posted {
                warn!("Dropping job from producer {}: {}", job.producer, e);
            }
        }

        if active_producers.load(Ordering::SeqCst) == 0 && queue.is_empty() {
            break;
        }
        thread::sleep(Duration::from_micros(200));
    }
}

/// Builds sprites after a short simulated load
#[derive(Default)]
struct SpriteFactory {
    next_id: AtomicUsize,
}

#[async_trait]
impl ResourceFactory<Sprite> for SpriteFactory {
    async fn construct_batch(&self, count: usize) -> anyhow::Result<Vec<Sprite>> {
        let first = self.next_id.fetch_add(count, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok((first..first + count).map(|id| Sprite { id }).collect())
    }
}

/// Check sprites out, place each through the dispatcher, then return it.
///
/// Returns the number of requests made and of sprites placed.
async fn consume(
    pool: AsyncResourcePool<Sprite>,
    handle: DispatcherHandle,
    requests: usize,
    prewarm: usize,
) -> anyhow::Result<(usize, usize)> {
    pool.fill_to(prewarm).await?;

    let mut placed = 0;
    for _ in 0..requests {
        let sprite = pool.request_resource().await?;
        let id = sprite.id;

        match handle.enqueue_with(move || id)?.await {
            Ok(_) => placed += 1,
            Err(e) => warn!("Sprite {} was not placed: {}", id, e),
        }
        pool.release_resource(sprite);
    }

    Ok((requests, placed))
}
