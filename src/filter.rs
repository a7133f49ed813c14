//! Exception filters.
//!
//! A [`Handlers`] list is an ordered set of `(matcher, handler)` pairs attached
//! to one lexical region of a cold computation. When a fault reaches the region
//! the matchers are evaluated top to bottom: category first (fault kind or the
//! concrete user error type), then the caller's predicate. The first match wins
//! and its handler's computation replaces the faulted one. Regions nest; the
//! driver walks them innermost first.

use crate::cold::Cold;
use crate::error::{Fault, FaultKind};
use crate::frame::Node;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

type Matcher = Arc<dyn Fn(&Fault) -> bool + Send + Sync>;
pub(crate) type ErasedHandler = Arc<dyn Fn(Fault) -> Node + Send + Sync>;

struct FilterEntry {
    matcher: Matcher,
    handler: ErasedHandler,
}

/// Erased, immutable filter list shared by every run of a computation.
pub(crate) struct FilterRegion {
    entries: Vec<FilterEntry>,
}

impl FilterRegion {
    /// First entry whose matcher accepts `fault`.
    ///
    /// A matcher that panics counts as a non-match; the fault keeps travelling.
    pub(crate) fn select(&self, fault: &Fault) -> Option<(usize, ErasedHandler)> {
        for (index, entry) in self.entries.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| (entry.matcher)(fault))) {
                Ok(true) => return Some((index, entry.handler.clone())),
                Ok(false) => {}
                Err(_) => {
                    warn!(
                        filter = index,
                        "Exception filter predicate panicked, treated as no match"
                    );
                }
            }
        }
        None
    }
}

/// Ordered exception filter list for a computation yielding `T`.
pub struct Handlers<T> {
    entries: Vec<FilterEntry>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Handlers<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Handle user faults whose payload is an `E`.
    pub fn on<E, H>(self, handler: H) -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
        H: Fn(&E) -> Cold<T> + Send + Sync + 'static,
    {
        self.on_when::<E, _, _>(|_| true, handler)
    }

    /// Handle user faults whose payload is an `E` and satisfies `predicate`.
    pub fn on_when<E, P, H>(mut self, predicate: P, handler: H) -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
        P: Fn(&E) -> bool + Send + Sync + 'static,
        H: Fn(&E) -> Cold<T> + Send + Sync + 'static,
    {
        let matcher: Matcher = Arc::new(move |fault: &Fault| {
            fault.downcast_ref::<E>().is_some_and(|e| predicate(e))
        });
        let handler: ErasedHandler = Arc::new(move |fault: Fault| match fault.downcast_ref::<E>() {
            Some(e) => handler(e).instantiate(),
            None => Node::Faulted(fault),
        });
        self.entries.push(FilterEntry { matcher, handler });
        self
    }

    /// Handle every fault of the given category.
    ///
    /// `FaultKind::Cancelled` never matches the run's own cancellation: after
    /// the run's token fires, regions pass every fault outward untouched and
    /// only `finally` actions run.
    pub fn on_kind<H>(mut self, kind: FaultKind, handler: H) -> Self
    where
        H: Fn(&Fault) -> Cold<T> + Send + Sync + 'static,
    {
        let matcher: Matcher = Arc::new(move |fault: &Fault| fault.kind() == kind);
        self.entries.push(FilterEntry {
            matcher,
            handler: erase(handler),
        });
        self
    }

    /// Handle any fault that reaches this entry.
    pub fn on_any<H>(mut self, handler: H) -> Self
    where
        H: Fn(&Fault) -> Cold<T> + Send + Sync + 'static,
    {
        self.entries.push(FilterEntry {
            matcher: Arc::new(|_: &Fault| true),
            handler: erase(handler),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_region(self) -> Arc<FilterRegion> {
        Arc::new(FilterRegion {
            entries: self.entries,
        })
    }
}

impl<T: Send + 'static> Default for Handlers<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn erase<T, H>(handler: H) -> ErasedHandler
where
    T: Send + 'static,
    H: Fn(&Fault) -> Cold<T> + Send + Sync + 'static,
{
    Arc::new(move |fault: Fault| handler(&fault).instantiate())
}
