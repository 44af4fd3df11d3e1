//! Single-assignment result cells.
//!
//! A [`Completer`] is handed to the thread that runs a piece of work and a
//! [`CompletionFuture`] to the thread that asked for it. The completer writes
//! the outcome exactly once; the future observes it either by blocking or by
//! being awaited.

use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use tickgate_core::error::WorkError;

enum State<T> {
    Pending(Option<Waker>),
    Ready(Result<T, WorkError>),
    Taken,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

/// Create a connected completer/future pair
pub fn completion_pair<T>() -> (Completer<T>, CompletionFuture<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending(None)),
        ready: Condvar::new(),
    });

    (
        Completer {
            shared: Some(Arc::clone(&shared)),
        },
        CompletionFuture { shared },
    )
}

/// Write side of a completion cell.
///
/// Dropping a completer without calling [`Completer::complete`] resolves the
/// future to [`WorkError::Abandoned`].
pub struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Completer<T> {
    /// Resolve with a value
    pub fn fulfill(self, value: T) {
        self.complete(Ok(value));
    }

    /// Resolve with an error
    pub fn fail(self, error: WorkError) {
        self.complete(Err(error));
    }

    /// Resolve with the given outcome
    pub fn complete(mut self, result: Result<T, WorkError>) {
        if let Some(shared) = self.shared.take() {
            Self::resolve(&shared, result);
        }
    }

    fn resolve(shared: &Shared<T>, result: Result<T, WorkError>) {
        let waker = {
            let mut state = shared.state.lock();
            match std::mem::replace(&mut *state, State::Ready(result)) {
                State::Pending(waker) => waker,
                // A completer is consumed on use, so this cannot happen.
                previous => {
                    *state = previous;
                    return;
                }
            }
        };

        shared.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            Self::resolve(&shared, Err(WorkError::Abandoned));
        }
    }
}

/// Read side of a completion cell.
///
/// Resolves exactly once, to the value produced by the work item or to the
/// [`WorkError`] describing why there is none.
pub struct CompletionFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> CompletionFuture<T> {
    /// A future that is already resolved
    pub fn ready(result: Result<T, WorkError>) -> Self {
        let (completer, future) = completion_pair();
        completer.complete(result);
        future
    }

    /// Whether the outcome is available
    pub fn is_completed(&self) -> bool {
        !matches!(*self.shared.state.lock(), State::Pending(_))
    }

    /// Block until the outcome is available or `timeout` elapses.
    ///
    /// Returns `true` if the future is resolved.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();

        while matches!(*state, State::Pending(_)) {
            if self.shared.ready.wait_until(&mut state, deadline).timed_out() {
                return !matches!(*state, State::Pending(_));
            }
        }
        true
    }

    /// Block the calling thread until the outcome is available.
    ///
    /// Must not be called on the thread that is supposed to run the work,
    /// since nothing would ever resolve the future.
    pub fn wait(self) -> Result<T, WorkError> {
        let mut state = self.shared.state.lock();

        while matches!(*state, State::Pending(_)) {
            self.shared.ready.wait(&mut state);
        }

        match std::mem::replace(&mut *state, State::Taken) {
            State::Ready(result) => result,
            _ => panic!("CompletionFuture result was already taken"),
        }
    }
}

impl<T> Future for CompletionFuture<T> {
    type Output = Result<T, WorkError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();

        if let State::Pending(waker) = &mut *state {
            let stale = waker
                .as_ref()
                .map_or(true, |existing| !existing.will_wake(cx.waker()));
            if stale {
                *waker = Some(cx.waker().clone());
            }
            return Poll::Pending;
        }

        match std::mem::replace(&mut *state, State::Taken) {
            State::Ready(result) => Poll::Ready(result),
            _ => panic!("CompletionFuture polled after completion"),
        }
    }
}

impl<T> std::fmt::Debug for CompletionFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionFuture")
            .field("completed", &self.is_completed())
            .finish()
    }
}
