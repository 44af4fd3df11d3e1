//! Main-thread dispatcher.
//!
//! The host creates one [`MainThreadDispatcher`] on its designated thread
//! and calls [`MainThreadDispatcher::pump`] once per tick. Producers get a
//! [`DispatcherHandle`] and use it to hand work to that thread, either
//! fire-and-forget, with a [`CompletionFuture`] for the outcome, or by
//! blocking until the work has run.
//!
//! Handles do not keep the dispatcher alive. Once the owner is shut down,
//! every call through a handle fails with [`DispatchError::Uninitialized`],
//! and work that was still queued resolves to [`WorkError::Abandoned`].

use log::{debug, info};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tickgate_core::config::DispatcherConfig;
use tickgate_core::error::{DispatchError, Error as TickgateError, WorkError};

use super::context::{ContextStats, GatedExecutionContext, PumpReport};
use crate::sync::completion::CompletionFuture;

/// Owner of the designated-thread work queue.
///
/// Not `Clone`: only the host's tick driver should hold it, which keeps
/// `pump` from ever running concurrently with itself.
pub struct MainThreadDispatcher {
    context: Arc<GatedExecutionContext>,
}

impl MainThreadDispatcher {
    /// Create a dispatcher with the given configuration
    pub fn new(config: &DispatcherConfig) -> Self {
        info!(
            "Creating main-thread dispatcher with a {}ms pump budget",
            config.time_budget_ms
        );
        Self {
            context: Arc::new(GatedExecutionContext::with_config(config)),
        }
    }

    /// Create a dispatcher with an explicit pump budget
    pub fn with_budget(time_budget: Duration) -> Self {
        Self {
            context: Arc::new(GatedExecutionContext::new(time_budget)),
        }
    }

    /// Get a producer handle
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            context: Arc::downgrade(&self.context),
        }
    }

    /// Run queued work. Call exactly once per host tick.
    pub fn pump(&self) -> PumpReport {
        self.context.pump()
    }

    /// Number of queued work items
    pub fn pending(&self) -> usize {
        self.context.len()
    }

    /// The per-cycle time budget
    pub fn time_budget(&self) -> Duration {
        self.context.time_budget()
    }

    /// Cumulative statistics for the underlying context
    pub fn stats(&self) -> ContextStats {
        self.context.stats()
    }

    /// Tear the dispatcher down.
    ///
    /// Equivalent to dropping it; provided so the host's shutdown path reads
    /// explicitly.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Default for MainThreadDispatcher {
    fn default() -> Self {
        Self::new(&DispatcherConfig::default())
    }
}

impl Drop for MainThreadDispatcher {
    fn drop(&mut self) {
        let abandoned = self.context.discard_pending();
        info!(
            "Main-thread dispatcher shut down ({} pending items abandoned)",
            abandoned
        );
    }
}

/// Cheap, clonable producer handle to a [`MainThreadDispatcher`].
#[derive(Clone, Default)]
pub struct DispatcherHandle {
    context: Weak<GatedExecutionContext>,
}

impl DispatcherHandle {
    /// A handle that is not bound to any dispatcher.
    ///
    /// Every dispatch call on it fails with `Uninitialized`.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Whether the dispatcher behind this handle is still running
    pub fn is_alive(&self) -> bool {
        self.context.strong_count() > 0
    }

    fn context(&self) -> Result<Arc<GatedExecutionContext>, DispatchError> {
        self.context.upgrade().ok_or(DispatchError::Uninitialized)
    }

    /// Queue an action without waiting for it
    pub fn post<F>(&self, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.context()?.post(f);
        Ok(())
    }

    /// Queue an action; the future resolves once it has run
    pub fn enqueue<F>(&self, action: F) -> Result<CompletionFuture<()>, DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.try_enqueue_with(move || {
            action();
            Ok(())
        })
    }

    /// Queue a function; the future resolves to its return value
    pub fn enqueue_with<F, T>(&self, func: F) -> Result<CompletionFuture<T>, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.try_enqueue_with(move || Ok(func()))
    }

    /// Queue a fallible function; an `Err` resolves the future to
    /// [`WorkError::Failed`]
    pub fn try_enqueue_with<F, T>(&self, func: F) -> Result<CompletionFuture<T>, DispatchError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        Ok(self.context()?.dispatch(func))
    }

    /// Queue a function and block until the designated thread has run it.
    ///
    /// Must not be called from the designated thread.
    pub fn send<F, T>(&self, f: F) -> Result<T, TickgateError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.try_send(move || Ok(f()))
    }

    /// Fallible variant of [`send`](Self::send)
    pub fn try_send<F, T>(&self, f: F) -> Result<T, TickgateError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        // Release the strong reference before blocking so a concurrent
        // shutdown can still drop the queue and abandon this item.
        let future = self.try_enqueue_with(f)?;
        debug!("Blocking producer until the designated thread runs its work item");
        future.wait().map_err(TickgateError::from)
    }
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Process-wide slot for hosts that need ambient access to a dispatcher.
///
/// Prefer passing [`DispatcherHandle`]s explicitly. The slot follows
/// first-writer-wins: installing while a live handle is present does nothing.
pub mod global {
    use super::DispatcherHandle;
    use log::debug;
    use once_cell::sync::Lazy;
    use parking_lot::RwLock;
    use tickgate_core::error::DispatchError;

    static CURRENT: Lazy<RwLock<Option<DispatcherHandle>>> = Lazy::new(|| RwLock::new(None));

    /// Install `handle` unless a live one is already installed.
    ///
    /// Returns `true` if `handle` became the current dispatcher.
    pub fn install(handle: DispatcherHandle) -> bool {
        let mut current = CURRENT.write();
        if current.as_ref().is_some_and(|h| h.is_alive()) {
            debug!("A dispatcher is already installed, ignoring registration");
            return false;
        }
        *current = Some(handle);
        true
    }

    /// The installed dispatcher, if it is still running
    pub fn current() -> Result<DispatcherHandle, DispatchError> {
        CURRENT
            .read()
            .as_ref()
            .filter(|h| h.is_alive())
            .cloned()
            .ok_or(DispatchError::Uninitialized)
    }

    /// Whether a running dispatcher is installed
    pub fn exists() -> bool {
        current().is_ok()
    }

    /// Clear the slot
    pub fn uninstall() {
        CURRENT.write().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn pump_until_finished<T>(dispatcher: &MainThreadDispatcher, worker: &thread::JoinHandle<T>) {
        while !worker.is_finished() {
            dispatcher.pump();
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_enqueue_resolves_after_pump() {
        let dispatcher = MainThreadDispatcher::default();
        let handle = dispatcher.handle();

        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let future = handle
            .enqueue(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(!future.is_completed());
        assert_eq!(dispatcher.pending(), 1);

        dispatcher.pump();
        assert!(future.wait().is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_enqueue_with_typed_result() {
        let dispatcher = MainThreadDispatcher::with_budget(Duration::from_millis(5));
        let future = dispatcher.handle().enqueue_with(|| "frame".len()).unwrap();

        dispatcher.pump();
        assert_eq!(future.wait().unwrap(), 5);
    }

    #[test]
    fn test_enqueue_failure_is_captured() {
        let dispatcher = MainThreadDispatcher::default();
        let handle = dispatcher.handle();

        let panicked = handle.enqueue(|| panic!("spawn failed")).unwrap();
        let failed = handle
            .try_enqueue_with(|| -> anyhow::Result<u8> { Err(anyhow::anyhow!("missing asset")) })
            .unwrap();

        let report = dispatcher.pump();
        assert_eq!(report.executed, 2);
        // Captured into the futures, not reported as pump panics
        assert_eq!(report.panicked, 0);

        assert!(matches!(panicked.wait(), Err(WorkError::Panicked(_))));
        match failed.wait() {
            Err(WorkError::Failed(e)) => assert_eq!(e.to_string(), "missing asset"),
            other => panic!("Expected failed error, got {:?}", other),
        }
    }

    #[test]
    fn test_send_through_handle() {
        let dispatcher = MainThreadDispatcher::default();
        let handle = dispatcher.handle();

        let worker = thread::spawn(move || handle.send(|| thread::current().name().map(String::from)));
        pump_until_finished(&dispatcher, &worker);

        // The closure ran on this (the pumping) thread
        let ran_on = worker.join().unwrap().unwrap();
        assert_eq!(ran_on, thread::current().name().map(String::from));
    }

    #[test]
    fn test_detached_handle_is_uninitialized() {
        let handle = DispatcherHandle::detached();
        assert!(!handle.is_alive());
        assert_eq!(handle.post(|| {}), Err(DispatchError::Uninitialized));
        assert!(matches!(
            handle.enqueue(|| {}),
            Err(DispatchError::Uninitialized)
        ));
        assert!(matches!(
            handle.send(|| 1),
            Err(TickgateError::Dispatch(DispatchError::Uninitialized))
        ));
    }

    #[test]
    fn test_shutdown_abandons_pending_work() {
        let dispatcher = MainThreadDispatcher::default();
        let handle = dispatcher.handle();

        let future = handle.enqueue_with(|| 10).unwrap();
        dispatcher.shutdown();

        assert!(!handle.is_alive());
        assert!(matches!(future.wait(), Err(WorkError::Abandoned)));
        assert!(matches!(
            handle.enqueue(|| {}),
            Err(DispatchError::Uninitialized)
        ));
    }

    #[test]
    fn test_global_slot_first_writer_wins() {
        global::uninstall();
        assert!(matches!(global::current(), Err(DispatchError::Uninitialized)));

        let first = MainThreadDispatcher::default();
        let second = MainThreadDispatcher::default();

        assert!(global::install(first.handle()));
        assert!(!global::install(second.handle()));
        assert!(global::exists());

        // The installed handle reaches the first dispatcher only
        global::current().unwrap().post(|| {}).unwrap();
        assert_eq!(first.pending(), 1);
        assert_eq!(second.pending(), 0);

        // Once torn down, the slot reports uninitialized and accepts a new owner
        drop(first);
        assert!(matches!(global::current(), Err(DispatchError::Uninitialized)));
        assert!(global::install(second.handle()));
        assert!(global::exists());

        global::uninstall();
        assert!(!global::exists());
    }
}
