//! Eagerly started ("hot") futures.
//!
//! A [`HotFuture`] is a shared completion cell: whoever holds the matching
//! [`Promise`] settles it exactly once, and every subscriber, blocked waiter and
//! polling task observes the same outcome. `run_as_future` produces one, and a
//! cold computation can await one without re-executing the work behind it.

use crate::error::{Fault, Outcome};
use crate::scheduler::TokioScheduler;
use futures::FutureExt;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::warn;

type Callback<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

enum State<T> {
    Pending {
        callbacks: Vec<Callback<T>>,
        wakers: Vec<Waker>,
    },
    Complete(Outcome<T>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T: Clone> Shared<T> {
    fn new(state: State<T>) -> Self {
        Self {
            state: Mutex::new(state),
            ready: Condvar::new(),
        }
    }

    /// Store the outcome and notify everyone. Returns false if already settled.
    fn settle(&self, outcome: Outcome<T>) -> bool {
        let mut state = self.state.lock();
        let (callbacks, wakers) = match &mut *state {
            State::Complete(_) => return false,
            State::Pending { callbacks, wakers } => {
                (std::mem::take(callbacks), std::mem::take(wakers))
            }
        };
        *state = State::Complete(outcome.clone());
        self.ready.notify_all();
        drop(state);

        for callback in callbacks {
            callback(outcome.clone());
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }
}

/// Write side of a [`HotFuture`].
///
/// Dropping an unsettled promise fails the future with a composition fault so
/// that no waiter is left hanging.
pub struct Promise<T: Clone> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T: Clone> Promise<T> {
    pub fn complete(mut self, outcome: Outcome<T>) {
        if let Some(shared) = self.shared.take() {
            shared.settle(outcome);
        }
    }

    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(self, fault: Fault) {
        self.complete(Err(fault));
    }
}

impl<T: Clone> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            if shared.settle(Err(Fault::composition(
                "promise dropped before completion",
            ))) {
                warn!("Promise dropped before completion");
            }
        }
    }
}

/// Already-started asynchronous value.
pub struct HotFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for HotFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> HotFuture<T> {
    /// Create an unsettled future and the promise that settles it.
    pub fn pending() -> (Promise<T>, Self) {
        let shared = Arc::new(Shared::new(State::Pending {
            callbacks: Vec::new(),
            wakers: Vec::new(),
        }));
        (
            Promise {
                shared: Some(shared.clone()),
            },
            Self { shared },
        )
    }

    pub fn ready(value: T) -> Self {
        Self::settled(Ok(value))
    }

    pub fn failed(fault: Fault) -> Self {
        Self::settled(Err(fault))
    }

    fn settled(outcome: Outcome<T>) -> Self {
        Self {
            shared: Arc::new(Shared::new(State::Complete(outcome))),
        }
    }

    /// Start `future` immediately on the ambient runtime.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Outcome<T>> + Send + 'static,
    {
        match TokioScheduler::ambient() {
            Ok(scheduler) => Self::spawn_on(scheduler.handle(), future),
            Err(e) => Self::failed(Fault::composition(format!(
                "ambient runtime unavailable: {}",
                e
            ))),
        }
    }

    /// Start `future` immediately on the given runtime.
    pub fn spawn_on<F>(handle: &Handle, future: F) -> Self
    where
        F: Future<Output = Outcome<T>> + Send + 'static,
    {
        let (promise, hot) = Self::pending();
        handle.spawn(async move {
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => Err(Fault::from_panic(payload)),
            };
            promise.complete(outcome);
        });
        hot
    }

    /// Register a completion callback.
    ///
    /// Runs inline on the calling thread when the future is already settled,
    /// otherwise on whichever thread settles it.
    pub fn subscribe<F>(&self, on_complete: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        match &mut *state {
            State::Pending { callbacks, .. } => callbacks.push(Box::new(on_complete)),
            State::Complete(outcome) => {
                let outcome = outcome.clone();
                drop(state);
                on_complete(outcome);
            }
        }
    }

    /// Block the calling thread until the future settles.
    pub fn wait(&self) -> Outcome<T> {
        let mut state = self.shared.state.lock();
        loop {
            if let State::Complete(outcome) = &*state {
                return outcome.clone();
            }
            self.shared.ready.wait(&mut state);
        }
    }

    /// Block for at most `timeout`; `None` if still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        let mut state = self.shared.state.lock();
        if let State::Pending { .. } = &*state {
            self.shared.ready.wait_for(&mut state, timeout);
        }
        match &*state {
            State::Complete(outcome) => Some(outcome.clone()),
            State::Pending { .. } => None,
        }
    }

    pub fn try_outcome(&self) -> Option<Outcome<T>> {
        match &*self.shared.state.lock() {
            State::Complete(outcome) => Some(outcome.clone()),
            State::Pending { .. } => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(&*self.shared.state.lock(), State::Complete(_))
    }
}

impl<T: Clone + Send + 'static> Future for HotFuture<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        match &mut *state {
            State::Complete(outcome) => Poll::Ready(outcome.clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> fmt::Debug for HotFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let complete = matches!(&*self.shared.state.lock(), State::Complete(_));
        f.debug_struct("HotFuture")
            .field("complete", &complete)
            .finish()
    }
}
