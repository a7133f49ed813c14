//! Cold computations.
//!
//! A [`Cold<T>`] is an inert description of sequential asynchronous work. It is
//! built with a continuation-passing builder (`and_then`, `map`, `catch_with`,
//! ...) and does nothing until it is started: constructing, cloning or
//! composing one never runs body code. Every start instantiates a fresh frame
//! chain, so one computation can be started any number of times.
//!
//! ```no_run
//! use fasync::{sleep, Cold};
//! use std::time::Duration;
//!
//! fn add_async(x: i32, y: i32) -> Cold<i32> {
//!     sleep(Duration::from_millis(1))
//!         .map(move |_| x + y)
//!         .and_then(|sum| sleep(Duration::from_millis(1)).map(move |_| sum))
//! }
//!
//! let total = add_async(1, 2)
//!     .and_then(|a| add_async(3, 4).map(move |b| a + b))
//!     .run_blocking()
//!     .unwrap();
//! assert_eq!(total, 10);
//! ```

use crate::driver::{Run, RunContext};
use crate::error::{Fault, Outcome};
use crate::filter::{FilterRegion, Handlers};
use crate::frame::{FinallyAction, Node, Value};
use crate::hot::HotFuture;
use crate::source::SuspensionSource;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

type Step = Arc<dyn Fn(Value) -> Node + Send + Sync>;

/// Shared recipe behind a [`Cold`].
///
/// Combinators only link recipes together. Starting a run unfolds a single
/// level; each inner recipe is unfolded later by the driver as a body step, so
/// the length of a chain never shows up on the native stack.
struct Plan {
    shape: Shape,
}

enum Shape {
    Leaf(Box<dyn Fn() -> Node + Send + Sync>),
    Bind(Arc<Plan>, Step),
    Then(Arc<Plan>, Arc<Plan>),
    Guard(Arc<Plan>, Arc<FilterRegion>),
    Finally(Arc<Plan>, FinallyAction),
    /// Left behind while a plan is being released.
    Released,
}

impl Plan {
    fn instantiate(&self) -> Node {
        match &self.shape {
            Shape::Leaf(factory) => factory(),
            Shape::Bind(inner, step) => {
                let step = step.clone();
                Node::Bind(
                    Box::new(deferred(inner)),
                    Box::new(move |value: Value| step(value)),
                )
            }
            Shape::Then(first, next) => {
                let next = next.clone();
                Node::Bind(
                    Box::new(deferred(first)),
                    Box::new(move |_: Value| next.instantiate()),
                )
            }
            Shape::Guard(inner, region) => Node::Guard(Box::new(deferred(inner)), region.clone()),
            Shape::Finally(inner, action) => {
                Node::Finally(Box::new(deferred(inner)), action.clone())
            }
            Shape::Released => Node::Faulted(Fault::composition("computation already released")),
        }
    }

    fn release_into(&mut self, pending: &mut Vec<Arc<Plan>>) {
        match std::mem::replace(&mut self.shape, Shape::Released) {
            Shape::Bind(inner, _) | Shape::Guard(inner, _) | Shape::Finally(inner, _) => {
                pending.push(inner)
            }
            Shape::Then(first, next) => {
                pending.push(first);
                pending.push(next);
            }
            Shape::Leaf(_) | Shape::Released => {}
        }
    }
}

impl Drop for Plan {
    // Chains are released with an explicit work list, not by nested drop glue.
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.release_into(&mut pending);
        while let Some(plan) = pending.pop() {
            if let Some(mut plan) = Arc::into_inner(plan) {
                plan.release_into(&mut pending);
            }
        }
    }
}

/// Body step that unfolds `plan` once the driver reaches it.
fn deferred(plan: &Arc<Plan>) -> Node {
    let plan = plan.clone();
    Node::Body(Box::new(move || plan.instantiate()))
}

/// Inert, restartable asynchronous computation yielding `T`.
pub struct Cold<T> {
    plan: Arc<Plan>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Cold<T> {
    fn clone(&self) -> Self {
        Self {
            plan: self.plan.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Cold<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cold<{}>", std::any::type_name::<T>())
    }
}

/// Recover a typed value from the erased frame chain.
pub(crate) fn take_value<T: 'static>(value: Value) -> Outcome<T> {
    value.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
        Fault::composition(format!(
            "expected a value of type {}",
            std::any::type_name::<T>()
        ))
    })
}

impl<T: Send + 'static> Cold<T> {
    fn from_shape(shape: Shape) -> Self {
        Self {
            plan: Arc::new(Plan { shape }),
            _marker: PhantomData,
        }
    }

    fn from_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Node + Send + Sync + 'static,
    {
        Self::from_shape(Shape::Leaf(Box::new(factory)))
    }

    /// Fresh instruction tree for one run. Runs no body code.
    pub(crate) fn instantiate(&self) -> Node {
        self.plan.instantiate()
    }

    /// Computation that yields `value`.
    pub fn pure(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_factory(move || Node::Done(Box::new(value.clone())))
    }

    /// Computation that fails with `fault`.
    pub fn fail(fault: Fault) -> Self {
        Self::from_factory(move || Node::Faulted(fault.clone()))
    }

    /// Computation that fails with a user fault wrapping `err`.
    pub fn raise<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::fail(Fault::user(err))
    }

    /// Synchronous body, run when the computation is started.
    pub fn from_fn<F>(body: F) -> Self
    where
        F: Fn() -> Outcome<T> + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        Self::from_factory(move || {
            let body = body.clone();
            Node::Body(Box::new(move || {
                Node::from_outcome(body().map(|value| Box::new(value) as Value))
            }))
        })
    }

    /// Build the computation itself at start time.
    pub fn delay<F>(build: F) -> Self
    where
        F: Fn() -> Cold<T> + Send + Sync + 'static,
    {
        let build = Arc::new(build);
        Self::from_factory(move || {
            let build = build.clone();
            Node::Body(Box::new(move || build().instantiate()))
        })
    }

    /// Await a suspension source and yield its value.
    ///
    /// The source's value must be a `T`; `()` for sleeps and yields.
    pub fn suspend(source: SuspensionSource) -> Self {
        Self::from_factory(move || Node::Suspend(source.clone()))
    }

    /// Await an already-started future. Never re-runs the work behind it.
    pub fn await_hot(hot: HotFuture<T>) -> Self
    where
        T: Clone,
    {
        Self::suspend(SuspensionSource::external(hot))
    }

    /// Await `child` as its own run with its own frame chain.
    ///
    /// `and_then` splices a child into the caller's chain instead; both leave
    /// the child unstarted until this point is reached.
    pub fn nested(child: Cold<T>) -> Self {
        Self::suspend(SuspensionSource::nested(&child))
    }

    /// Feed the value into `next` and continue with the computation it returns.
    pub fn and_then<U, F>(&self, next: F) -> Cold<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Cold<U> + Send + Sync + 'static,
    {
        Cold::from_shape(Shape::Bind(
            self.plan.clone(),
            Arc::new(move |value: Value| match take_value::<T>(value) {
                Ok(value) => next(value).instantiate(),
                Err(fault) => Node::Faulted(fault),
            }),
        ))
    }

    /// Transform the value with a synchronous function.
    pub fn map<U, F>(&self, f: F) -> Cold<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Transform the value with a fallible synchronous function.
    pub fn try_map<U, F>(&self, f: F) -> Cold<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Outcome<U> + Send + Sync + 'static,
    {
        Cold::from_shape(Shape::Bind(
            self.plan.clone(),
            Arc::new(move |value: Value| {
                Node::from_outcome(
                    take_value::<T>(value)
                        .and_then(|value| f(value))
                        .map(|mapped| Box::new(mapped) as Value),
                )
            }),
        ))
    }

    /// Run `next` after this computation, discarding this one's value.
    pub fn then<U: Send + 'static>(&self, next: Cold<U>) -> Cold<U> {
        Cold::from_shape(Shape::Then(self.plan.clone(), next.plan.clone()))
    }

    /// Guard this computation with an ordered list of exception filters.
    pub fn catch_with(&self, handlers: Handlers<T>) -> Cold<T> {
        Cold::from_shape(Shape::Guard(self.plan.clone(), handlers.into_region()))
    }

    /// Guard with a single filter: user faults of type `E` satisfying `predicate`.
    pub fn catch_when<E, P, H>(&self, predicate: P, handler: H) -> Cold<T>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
        P: Fn(&E) -> bool + Send + Sync + 'static,
        H: Fn(&E) -> Cold<T> + Send + Sync + 'static,
    {
        self.catch_with(Handlers::new().on_when::<E, P, H>(predicate, handler))
    }

    /// Run `action` once this computation finishes, whatever the outcome.
    pub fn finally<F>(&self, action: F) -> Cold<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Cold::from_shape(Shape::Finally(self.plan.clone(), Arc::new(action)))
    }

    /// Prepare a run. Body code still waits for a driver entry point.
    pub fn start(&self, context: RunContext) -> Run<T> {
        Run::new(self.instantiate(), context)
    }

    /// Start with the ambient defaults and drive to completion on this thread.
    pub fn run_blocking(&self) -> Outcome<T> {
        self.start(RunContext::default()).run_blocking()
    }

    /// Start with the ambient defaults and drive on the scheduler.
    pub fn run_as_future(&self) -> HotFuture<T>
    where
        T: Clone,
    {
        self.start(RunContext::default()).run_as_future()
    }
}

impl Cold<()> {
    /// Run `body(i)` for `i` in `0..count`, one after another.
    pub fn repeat<F>(count: usize, body: F) -> Cold<()>
    where
        F: Fn(usize) -> Cold<()> + Send + Sync + 'static,
    {
        fn step<F>(index: usize, count: usize, body: Arc<F>) -> Cold<()>
        where
            F: Fn(usize) -> Cold<()> + Send + Sync + 'static,
        {
            if index >= count {
                return Cold::pure(());
            }
            body(index).and_then(move |_| step(index + 1, count, body.clone()))
        }

        let body = Arc::new(body);
        Cold::delay(move || step(0, count, body.clone()))
    }
}

/// Suspend for `duration`.
pub fn sleep(duration: Duration) -> Cold<()> {
    Cold::suspend(SuspensionSource::sleep(duration))
}

/// Hand the thread back to the scheduler once.
pub fn yield_now() -> Cold<()> {
    Cold::suspend(SuspensionSource::yield_now())
}
