//! Cooperative cancellation signal shared by every frame of a run.
//!
//! The signal is monotonic: once `cancel` has been called it stays signaled.
//! Suspension sources that block (timers, hot futures) register a wake-up
//! callback so they can complete early with [`Fault::Cancelled`](crate::error::Fault).

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Handle returned by [`CancellationToken::on_cancel`] for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelRegistration(u64);

struct Inner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback)>>,
}

/// Clonable cancellation signal (armed -> signaled, one way).
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Signal cancellation. Only the first call has an effect.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        debug!(waiters = callbacks.len(), "Cancellation signaled");
        for (_, callback) in callbacks {
            callback();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Run `callback` when the token is cancelled.
    ///
    /// If the token is already signaled the callback runs immediately on the
    /// calling thread and `None` is returned.
    pub fn on_cancel<F>(&self, callback: F) -> Option<CancelRegistration>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut callbacks = self.inner.callbacks.lock();
        if self.is_cancelled() {
            drop(callbacks);
            callback();
            return None;
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        callbacks.push((id, Box::new(callback)));
        Some(CancelRegistration(id))
    }

    /// Drop a callback that is no longer needed. Unknown registrations are ignored.
    pub fn unregister(&self, registration: CancelRegistration) {
        self.inner
            .callbacks
            .lock()
            .retain(|(id, _)| *id != registration.0);
    }

    #[cfg(test)]
    fn pending_callbacks(&self) -> usize {
        self.inner.callbacks.lock().len()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
