//! Suspension sources.
//!
//! Every place a run can pause is one of four sources, and all four complete
//! through the same single-shot `register(on_complete)` contract, so the driver
//! never special-cases a wait kind.

use crate::cancel::{CancelRegistration, CancellationToken};
use crate::cold::Cold;
use crate::driver::{self, Services};
use crate::error::{Fault, Outcome};
use crate::frame::{Node, Value};
use crate::hot::HotFuture;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Single-shot resumption callback.
pub(crate) type Resume = Box<dyn FnOnce(Outcome<Value>) + Send + 'static>;

/// Type-erased subscription to a hot future.
trait Subscribe: Send + Sync {
    fn subscribe(&self, on_complete: Resume);
}

impl<T: Clone + Send + 'static> Subscribe for HotFuture<T> {
    fn subscribe(&self, on_complete: Resume) {
        HotFuture::subscribe(self, move |outcome| {
            on_complete(outcome.map(|value| Box::new(value) as Value))
        });
    }
}

/// An already-started future awaited by a cold computation.
#[derive(Clone)]
pub struct ExternalFuture {
    inner: Arc<dyn Subscribe>,
}

impl<T: Clone + Send + 'static> From<HotFuture<T>> for ExternalFuture {
    fn from(hot: HotFuture<T>) -> Self {
        Self {
            inner: Arc::new(hot),
        }
    }
}

/// A cold computation awaited as a child run.
#[derive(Clone)]
pub struct NestedComputation {
    factory: Arc<dyn Fn() -> Node + Send + Sync>,
}

impl NestedComputation {
    fn start(&self) -> Node {
        (self.factory)()
    }
}

/// The events a run can suspend on.
#[derive(Clone)]
pub enum SuspensionSource {
    /// Resume with `()` after the duration elapses.
    SleepFor(Duration),
    /// Resume with `()` after a round trip through the scheduler's queue.
    Yield,
    /// Resume with the hot future's outcome.
    AwaitExternalFuture(ExternalFuture),
    /// Start the child as its own run and resume with its outcome.
    AwaitNestedComputation(NestedComputation),
}

impl SuspensionSource {
    pub fn sleep(duration: Duration) -> Self {
        SuspensionSource::SleepFor(duration)
    }

    pub fn yield_now() -> Self {
        SuspensionSource::Yield
    }

    pub fn external<T: Clone + Send + 'static>(hot: HotFuture<T>) -> Self {
        SuspensionSource::AwaitExternalFuture(hot.into())
    }

    pub fn nested<T: Send + 'static>(child: &Cold<T>) -> Self {
        let child = child.clone();
        SuspensionSource::AwaitNestedComputation(NestedComputation {
            factory: Arc::new(move || child.instantiate()),
        })
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SuspensionSource::SleepFor(_) => "sleep",
            SuspensionSource::Yield => "yield",
            SuspensionSource::AwaitExternalFuture(_) => "external_future",
            SuspensionSource::AwaitNestedComputation(_) => "nested_computation",
        }
    }

    /// Arrange for `on_complete` to be called exactly once with this source's outcome.
    ///
    /// May call `on_complete` before returning (already settled futures,
    /// already signaled cancellation).
    pub(crate) fn register(
        self,
        services: &Services,
        cancellation: Option<&CancellationToken>,
        on_complete: Resume,
    ) {
        match self {
            SuspensionSource::Yield => {
                services.scheduler.post(Box::new(move || {
                    on_complete(Ok(Box::new(())));
                }));
            }
            SuspensionSource::SleepFor(duration) => {
                let Some(once) = Once::arm(on_complete, cancellation) else {
                    return;
                };
                services.timer.after(
                    duration,
                    Box::new(move || once.fire(Ok(Box::new(())))),
                );
            }
            SuspensionSource::AwaitExternalFuture(external) => {
                let Some(once) = Once::arm(on_complete, cancellation) else {
                    return;
                };
                external
                    .inner
                    .subscribe(Box::new(move |outcome| once.fire(outcome)));
            }
            SuspensionSource::AwaitNestedComputation(child) => {
                let Some(once) = Once::arm(on_complete, cancellation) else {
                    return;
                };
                let child_context = driver::child_context(services, cancellation);
                driver::spawn_erased(
                    child.start(),
                    child_context,
                    services.clone(),
                    Box::new(move |outcome| once.fire(outcome)),
                );
            }
        }
    }
}

impl fmt::Debug for SuspensionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuspensionSource::SleepFor(d) => f.debug_tuple("SleepFor").field(d).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Completion shared between a source and the cancellation signal; whichever
/// fires first wins.
struct Once {
    slot: Mutex<Option<Resume>>,
    cancel: Mutex<Option<(CancellationToken, CancelRegistration)>>,
}

impl Once {
    /// `None` if the run is already cancelled (the callback has been fired).
    fn arm(on_complete: Resume, cancellation: Option<&CancellationToken>) -> Option<Arc<Self>> {
        let once = Arc::new(Self {
            slot: Mutex::new(Some(on_complete)),
            cancel: Mutex::new(None),
        });
        if let Some(token) = cancellation {
            let on_cancel = once.clone();
            match token.on_cancel(move || on_cancel.fire(Err(Fault::Cancelled))) {
                Some(registration) => {
                    *once.cancel.lock() = Some((token.clone(), registration));
                }
                None => return None,
            }
        }
        Some(once)
    }

    fn fire(&self, outcome: Outcome<Value>) {
        let Some(on_complete) = self.slot.lock().take() else {
            return;
        };
        if let Some((token, registration)) = self.cancel.lock().take() {
            token.unregister(registration);
        }
        on_complete(outcome);
    }
}
