//! Asynchronous resource pool with coalesced background refills.
//!
//! The pool keeps a buffer of ready-made resources. When a request finds the
//! buffer empty, the pool asks its [`ResourceFactory`] for another batch in a
//! spawned task. Concurrent requests that arrive while a batch is being built
//! attach to that same refill instead of starting their own, so at most one
//! refill is ever in flight per pool.

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use tickgate_core::config::PoolConfig;
use tickgate_core::error::PoolError;

/// Host capability that builds resources in batches.
///
/// The pool treats it as opaque and only ever calls it from inside a single
/// serialized refill.
#[async_trait]
pub trait ResourceFactory<T: Send + 'static>: Send + Sync + 'static {
    /// Build `count` new resources
    async fn construct_batch(&self, count: usize) -> anyhow::Result<Vec<T>>;
}

#[async_trait]
impl<T, F, Fut> ResourceFactory<T> for F
where
    T: Send + 'static,
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
{
    async fn construct_batch(&self, count: usize) -> anyhow::Result<Vec<T>> {
        (self)(count).await
    }
}

/// Progress of one refill, broadcast to everyone waiting on it
#[derive(Debug, Clone)]
enum RefillStatus {
    Running,
    Completed,
    Failed(PoolError),
}

/// Whether a refill is in flight, and how to wait for it
enum RefillState {
    Idle,
    Refilling(watch::Receiver<RefillStatus>),
}

/// Everything guarded by the pool lock.
///
/// The free buffer and the refill marker live behind the same lock so that
/// "buffer is empty, start a refill" is a single atomic step.
struct PoolState<T> {
    free: VecDeque<T>,
    refill: RefillState,
    batch_size: usize,
}

/// Statistics about the pool
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of refills started
    pub refills_started: usize,

    /// Number of refills that failed
    pub refills_failed: usize,

    /// Number of resources built by the factory
    pub resources_constructed: usize,

    /// Number of requests that returned a resource
    pub requests_served: usize,

    /// Number of requests that had to wait for a refill
    pub requests_waited: usize,
}

#[derive(Debug, Default)]
struct Counters {
    refills_started: AtomicUsize,
    refills_failed: AtomicUsize,
    resources_constructed: AtomicUsize,
    requests_served: AtomicUsize,
    requests_waited: AtomicUsize,
}

struct Inner<T: Send + 'static> {
    state: Mutex<PoolState<T>>,
    factory: Arc<dyn ResourceFactory<T>>,
    counters: Counters,
}

/// Reports the outcome of a refill exactly once.
///
/// If the refill task panics or is cancelled before reporting, dropping the
/// guard fails the refill so nobody waits on it forever.
struct RefillGuard<T: Send + 'static> {
    inner: Arc<Inner<T>>,
    status: Option<watch::Sender<RefillStatus>>,
}

impl<T: Send + 'static> RefillGuard<T> {
    fn finish(&mut self, outcome: Result<Vec<T>, PoolError>) {
        let Some(status) = self.status.take() else {
            return;
        };

        let counters = &self.inner.counters;
        let mut state = self.inner.state.lock();

        let report = match outcome {
            Ok(batch) => {
                trace!("Refill delivered {} resources", batch.len());
                counters
                    .resources_constructed
                    .fetch_add(batch.len(), Ordering::Relaxed);
                state.free.extend(batch);
                RefillStatus::Completed
            }
            Err(error) => {
                warn!("Pool refill failed: {}", error);
                counters.refills_failed.fetch_add(1, Ordering::Relaxed);
                RefillStatus::Failed(error)
            }
        };

        // Clear the marker and notify under the same lock, so a caller that
        // sees `Refilling` is guaranteed to receive this status.
        state.refill = RefillState::Idle;
        status.send_replace(report);
    }
}

impl<T: Send + 'static> Drop for RefillGuard<T> {
    fn drop(&mut self) {
        self.finish(Err(PoolError::RefillFailed(
            "refill task ended before completing".to_string(),
        )));
    }
}

/// A pool of pre-built resources that refills itself in the background.
///
/// Cloning the pool yields another handle to the same buffer.
pub struct AsyncResourcePool<T: Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> Clone for AsyncResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> AsyncResourcePool<T> {
    /// Create an empty pool
    pub fn new(factory: impl ResourceFactory<T>, config: &PoolConfig) -> Self {
        info!(
            "Creating async resource pool with refill batch size {}",
            config.refill_batch_size
        );

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PoolState {
                    free: VecDeque::new(),
                    refill: RefillState::Idle,
                    batch_size: config.refill_batch_size.max(1),
                }),
                factory: Arc::new(factory),
                counters: Counters::default(),
            }),
        }
    }

    /// Create an empty pool with the default configuration
    pub fn with_factory(factory: impl ResourceFactory<T>) -> Self {
        Self::new(factory, &PoolConfig::default())
    }

    /// Get a resource, waiting for refills as long as it takes.
    ///
    /// Returns at once when the buffer has a resource. Otherwise joins the
    /// refill in flight, or starts one, and tries again once it finishes.
    /// A failed refill is reported to every caller waiting on it.
    ///
    /// Must be called from within a tokio runtime, which runs the refill.
    pub async fn request_resource(&self) -> Result<T, PoolError> {
        let mut waited = false;

        loop {
            let refill = {
                let mut state = self.inner.state.lock();
                if let Some(resource) = state.free.pop_front() {
                    let counters = &self.inner.counters;
                    counters.requests_served.fetch_add(1, Ordering::Relaxed);
                    if waited {
                        counters.requests_waited.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(resource);
                }
                self.attach_or_start_refill(&mut state)?
            };

            waited = true;
            Self::wait_for_refill(refill).await?;
        }
    }

    /// Return a resource to the pool.
    ///
    /// Not validated and not capped: returning more than was taken grows the
    /// buffer.
    pub fn release_resource(&self, resource: T) {
        self.inner.state.lock().free.push_back(resource);
    }

    /// Fill the buffer until it holds at least `capacity` resources.
    ///
    /// Uses the same coalesced refill path as `request_resource`. Returns
    /// the buffer size once the target is reached.
    pub async fn fill_to(&self, capacity: usize) -> Result<usize, PoolError> {
        loop {
            let refill = {
                let mut state = self.inner.state.lock();
                if state.free.len() >= capacity {
                    return Ok(state.free.len());
                }
                self.attach_or_start_refill(&mut state)?
            };

            Self::wait_for_refill(refill).await?;
        }
    }

    /// Discard every buffered resource.
    ///
    /// Resources that are checked out, or still being built by a refill in
    /// flight, are not affected. Returns the number discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.inner.state.lock();
        let discarded = state.free.len();
        state.free.clear();
        debug!("Cleared {} buffered resources", discarded);
        discarded
    }

    /// Change how many resources each refill requests. Zero is raised to one.
    pub fn set_refill_batch_size(&self, batch_size: usize) {
        if batch_size == 0 {
            warn!("Refill batch size must be at least 1, using 1");
        }
        self.inner.state.lock().batch_size = batch_size.max(1);
    }

    /// Number of resources requested per refill
    pub fn refill_batch_size(&self) -> usize {
        self.inner.state.lock().batch_size
    }

    /// Number of buffered resources
    pub fn current_count(&self) -> usize {
        self.inner.state.lock().free.len()
    }

    /// Whether a refill is in flight
    pub fn is_refilling(&self) -> bool {
        matches!(self.inner.state.lock().refill, RefillState::Refilling(_))
    }

    /// Snapshot of the pool statistics
    pub fn stats(&self) -> PoolStats {
        let c = &self.inner.counters;
        PoolStats {
            refills_started: c.refills_started.load(Ordering::Relaxed),
            refills_failed: c.refills_failed.load(Ordering::Relaxed),
            resources_constructed: c.resources_constructed.load(Ordering::Relaxed),
            requests_served: c.requests_served.load(Ordering::Relaxed),
            requests_waited: c.requests_waited.load(Ordering::Relaxed),
        }
    }

    /// Join the refill in flight, or start one. Called with the lock held.
    fn attach_or_start_refill(
        &self,
        state: &mut PoolState<T>,
    ) -> Result<watch::Receiver<RefillStatus>, PoolError> {
        if let RefillState::Refilling(refill) = &state.refill {
            trace!("Joining refill already in flight");
            return Ok(refill.clone());
        }

        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| PoolError::RuntimeUnavailable)?;

        let (status, refill) = watch::channel(RefillStatus::Running);
        state.refill = RefillState::Refilling(refill.clone());

        let count = state.batch_size;
        let mut guard = RefillGuard {
            inner: Arc::clone(&self.inner),
            status: Some(status),
        };
        self.inner
            .counters
            .refills_started
            .fetch_add(1, Ordering::Relaxed);
        trace!("Starting refill of {} resources", count);

        runtime.spawn(async move {
            let factory = Arc::clone(&guard.inner.factory);
            let outcome = match factory.construct_batch(count).await {
                Ok(batch) if batch.is_empty() => Err(PoolError::EmptyBatch),
                Ok(batch) => Ok(batch),
                Err(e) => Err(PoolError::RefillFailed(format!("{:#}", e))),
            };
            guard.finish(outcome);
        });

        Ok(refill)
    }

    async fn wait_for_refill(mut refill: watch::Receiver<RefillStatus>) -> Result<(), PoolError> {
        let status = refill
            .wait_for(|status| !matches!(status, RefillStatus::Running))
            .await
            .map(|status| status.clone());

        match status {
            Ok(RefillStatus::Failed(error)) => Err(error),
            Ok(_) => Ok(()),
            Err(_) => Err(PoolError::RefillFailed(
                "refill task ended before completing".to_string(),
            )),
        }
    }
}
