//! Time-gated execution context.
//!
//! Work is posted from any thread into a single FIFO queue and executed on
//! one designated thread, which drains the queue once per tick through
//! [`GatedExecutionContext::pump`]. Each pump cycle stops once its time
//! budget is used up, so a flood of posted work cannot stall the tick.

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, trace, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tickgate_core::config::DispatcherConfig;
use tickgate_core::error::WorkError;

use crate::sync::completion::{completion_pair, CompletionFuture};

/// Run `f`, turning a panic or a returned error into a [`WorkError`]
pub(crate) fn run_captured<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, WorkError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(WorkError::Failed(e)),
        Err(payload) => Err(WorkError::from_panic(payload)),
    }
}

/// A queued callback
struct WorkItem {
    /// The closure to execute, with its state captured
    func: Box<dyn FnOnce() + Send + 'static>,

    /// When the item was posted
    enqueued_at: Instant,
}

/// What a single pump cycle did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpReport {
    /// Items executed during the cycle
    pub executed: usize,

    /// Items among `executed` that panicked
    pub panicked: usize,

    /// Wall time spent draining
    pub elapsed: Duration,

    /// Items still queued when the cycle returned
    pub remaining: usize,

    /// Whether the cycle stopped because the budget was used up
    pub budget_exhausted: bool,
}

/// Cumulative statistics for a context
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ContextStats {
    /// Number of items posted
    pub items_posted: usize,

    /// Number of items executed
    pub items_executed: usize,

    /// Number of executed items that panicked
    pub items_panicked: usize,

    /// Number of pump cycles that found work to do
    pub pump_cycles: usize,

    /// Number of cycles that hit the time budget
    pub budget_exhausted_cycles: usize,

    /// Longest cycle observed (microseconds)
    pub max_cycle_time_us: u64,
}

#[derive(Debug, Default)]
struct Counters {
    items_posted: AtomicUsize,
    items_executed: AtomicUsize,
    items_panicked: AtomicUsize,
    pump_cycles: AtomicUsize,
    budget_exhausted_cycles: AtomicUsize,
    max_cycle_time_us: AtomicUsize,
}

/// A cross-thread work queue drained under a per-cycle time budget.
///
/// `post`, `dispatch` and `send` may be called from any thread. `pump` must
/// only be called by the designated thread, and never concurrently with
/// itself.
pub struct GatedExecutionContext {
    sender: Sender<WorkItem>,
    receiver: Receiver<WorkItem>,
    time_budget: Duration,
    counters: Counters,
}

impl GatedExecutionContext {
    /// Create a context whose pump cycles stop after `time_budget`
    pub fn new(time_budget: Duration) -> Self {
        let (sender, receiver) = unbounded();
        debug!(
            "Creating gated execution context with a {:.2}ms budget",
            time_budget.as_secs_f64() * 1000.0
        );

        Self {
            sender,
            receiver,
            time_budget,
            counters: Counters::default(),
        }
    }

    /// Create a context from dispatcher configuration
    pub fn with_config(config: &DispatcherConfig) -> Self {
        Self::new(config.time_budget())
    }

    /// The per-cycle time budget
    pub fn time_budget(&self) -> Duration {
        self.time_budget
    }

    /// Queue a callback for execution on the designated thread.
    ///
    /// Never blocks. Callable from the designated thread itself; the item
    /// then runs on a later cycle, or later in the current one if budget
    /// remains.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let item = WorkItem {
            func: Box::new(f),
            enqueued_at: Instant::now(),
        };

        // The receiver lives as long as `self`, so the channel cannot be
        // disconnected here.
        if self.sender.send(item).is_err() {
            warn!("Execution context queue is disconnected, dropping work item");
            return;
        }
        self.counters.items_posted.fetch_add(1, Ordering::Relaxed);
    }

    /// Queue a callback and return a future for its outcome.
    ///
    /// A panic or an `Err` returned by the callback resolves the future to
    /// the matching [`WorkError`]; neither escapes into the pump loop.
    pub fn dispatch<F, T>(&self, f: F) -> CompletionFuture<T>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (completer, future) = completion_pair();
        self.post(move || completer.complete(run_captured(f)));
        future
    }

    /// Queue a callback and block until the designated thread has run it.
    ///
    /// A panic in the callback is returned as [`WorkError::Panicked`].
    /// Calling this on the designated thread deadlocks: the calling thread
    /// would be waiting for a pump that only it can perform.
    pub fn send<F, T>(&self, f: F) -> Result<T, WorkError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.try_send(move || Ok(f()))
    }

    /// Like [`send`](Self::send), for callbacks that can fail with an error
    pub fn try_send<F, T>(&self, f: F) -> Result<T, WorkError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.dispatch(f).wait()
    }

    /// Drain queued work on the designated thread.
    ///
    /// Returns at once if nothing is queued. Otherwise items run one at a
    /// time, in posting order, for as long as the queue is non-empty and the
    /// time since the cycle started is below the budget. The budget is only
    /// checked between items: an item that is already running always
    /// finishes, so a single slow item can overrun the cycle, and every
    /// non-empty cycle runs at least one item.
    pub fn pump(&self) -> PumpReport {
        if self.receiver.is_empty() {
            return PumpReport::default();
        }

        let start = Instant::now();
        let mut report = PumpReport::default();

        while let Ok(item) = self.receiver.try_recv() {
            trace!(
                "Executing work item (queue time: {:.2}ms)",
                item.enqueued_at.elapsed().as_secs_f64() * 1000.0
            );

            let func = item.func;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(func)) {
                let error = WorkError::from_panic(payload);
                error!("Work item panicked on the designated thread: {}", error);
                report.panicked += 1;
            }
            report.executed += 1;

            if start.elapsed() >= self.time_budget {
                report.budget_exhausted = true;
                break;
            }
        }

        report.elapsed = start.elapsed();
        report.remaining = self.receiver.len();
        self.record_cycle(&report);

        if report.budget_exhausted && report.remaining > 0 {
            debug!(
                "Pump budget exhausted after {} items, {} deferred to the next cycle",
                report.executed, report.remaining
            );
        }

        report
    }

    fn record_cycle(&self, report: &PumpReport) {
        let c = &self.counters;
        c.pump_cycles.fetch_add(1, Ordering::Relaxed);
        c.items_executed.fetch_add(report.executed, Ordering::Relaxed);
        c.items_panicked.fetch_add(report.panicked, Ordering::Relaxed);
        if report.budget_exhausted {
            c.budget_exhausted_cycles.fetch_add(1, Ordering::Relaxed);
        }
        c.max_cycle_time_us
            .fetch_max(report.elapsed.as_micros() as usize, Ordering::Relaxed);
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Drop every queued item without running it.
    ///
    /// Futures attached to discarded items resolve to
    /// [`WorkError::Abandoned`]. Returns the number of discarded items.
    pub fn discard_pending(&self) -> usize {
        let discarded = self.receiver.try_iter().count();
        if discarded > 0 {
            debug!("Discarded {} pending work items", discarded);
        }
        discarded
    }

    /// Snapshot of the cumulative statistics
    pub fn stats(&self) -> ContextStats {
        let c = &self.counters;
        ContextStats {
            items_posted: c.items_posted.load(Ordering::Relaxed),
            items_executed: c.items_executed.load(Ordering::Relaxed),
            items_panicked: c.items_panicked.load(Ordering::Relaxed),
            pump_cycles: c.pump_cycles.load(Ordering::Relaxed),
            budget_exhausted_cycles: c.budget_exhausted_cycles.load(Ordering::Relaxed),
            max_cycle_time_us: c.max_cycle_time_us.load(Ordering::Relaxed) as u64,
        }
    }
}

impl Default for GatedExecutionContext {
    fn default() -> Self {
        Self::with_config(&DispatcherConfig::default())
    }
}

impl Drop for GatedExecutionContext {
    fn drop(&mut self) {
        self.discard_pending();
    }
}
