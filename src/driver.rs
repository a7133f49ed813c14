//! Trampoline driver.
//!
//! A started computation is advanced by a [`Machine`]: one mutable "current
//! control" slot plus an explicit frame stack. The step loop evaluates nodes and
//! delivers outcomes to frames iteratively; a suspension leaves the loop with
//! nothing retained on the native stack, and the source's completion simply
//! puts the next outcome into the slot. Long chains of suspensions therefore
//! run in constant stack depth.
//!
//! Two entry points share the loop:
//! - [`Run::run_blocking`] parks the calling thread on each suspension.
//! - [`Run::run_as_future`] returns a [`HotFuture`] at once and steps the run on
//!   the scheduler.

use crate::cancel::CancellationToken;
use crate::cold::{take_value, Cold};
use crate::error::{Fault, Outcome};
use crate::frame::{Frame, FrameResult, Node, Resumption, Value};
use crate::hot::HotFuture;
use crate::scheduler::{self, Scheduler, Timer};
use crate::source::Resume;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Identifier of one run, for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(u64);

impl RunId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        RunId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Context shared read-only by every frame of one run.
///
/// Absent parts fall back to the ambient defaults: the ambient tokio
/// scheduler and timer, no cancellation, and the ambient slice budget.
#[derive(Clone, Default)]
pub struct RunContext {
    cancellation: Option<CancellationToken>,
    scheduler: Option<Arc<dyn Scheduler>>,
    timer: Option<Arc<dyn Timer>>,
    max_steps_per_slice: Option<usize>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(
        cancellation: Option<CancellationToken>,
        scheduler: Option<Arc<dyn Scheduler>>,
    ) -> Self {
        Self {
            cancellation,
            scheduler,
            ..Self::default()
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn with_max_steps_per_slice(mut self, steps: usize) -> Self {
        self.max_steps_per_slice = Some(steps.max(1));
        self
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn slice_budget(&self) -> usize {
        self.max_steps_per_slice
            .unwrap_or_else(|| scheduler::ambient_config().max_steps_per_slice)
    }

    /// Fill in the scheduler and timer, falling back to the ambient runtime.
    fn resolve_services(&self) -> Outcome<Services> {
        if let (Some(scheduler), Some(timer)) = (&self.scheduler, &self.timer) {
            return Ok(Services {
                scheduler: scheduler.clone(),
                timer: timer.clone(),
            });
        }
        let (ambient_scheduler, ambient_timer) = scheduler::ambient_services().map_err(|e| {
            Fault::composition(format!("ambient runtime unavailable: {}", e))
        })?;
        Ok(Services {
            scheduler: self.scheduler.clone().unwrap_or(ambient_scheduler),
            timer: self.timer.clone().unwrap_or(ambient_timer),
        })
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("cancellation", &self.cancellation)
            .field("custom_scheduler", &self.scheduler.is_some())
            .field("custom_timer", &self.timer.is_some())
            .field("max_steps_per_slice", &self.max_steps_per_slice)
            .finish()
    }
}

/// Resolved scheduler and timer of a run.
#[derive(Clone)]
pub(crate) struct Services {
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) timer: Arc<dyn Timer>,
}

enum Control {
    Eval(Node),
    Deliver(Outcome<Value>),
}

/// Step loop state of one run.
pub(crate) struct Machine {
    id: RunId,
    control: Option<Control>,
    frames: Vec<Frame>,
    context: RunContext,
    steps: u64,
    suspensions: u64,
}

impl Machine {
    fn new(root: Node, context: RunContext) -> Self {
        Self {
            id: RunId::next(),
            control: Some(Control::Eval(root)),
            frames: Vec::new(),
            context,
            steps: 0,
            suspensions: 0,
        }
    }

    /// Advance until the run suspends, finishes, or `budget` steps have run.
    ///
    /// `None` means the budget ran out and the run can continue at once.
    fn advance(&mut self, budget: usize) -> Option<FrameResult> {
        let mut taken = 0usize;
        loop {
            if taken >= budget {
                return None;
            }
            taken += 1;
            self.steps += 1;

            let control = match self.control.take() {
                Some(control) => control,
                None => {
                    return Some(FrameResult::Faulted(Fault::composition(
                        "run advanced after completion",
                    )))
                }
            };

            let next = match control {
                Control::Eval(node) => match node {
                    Node::Done(value) => Control::Deliver(Ok(value)),
                    Node::Faulted(fault) => Control::Deliver(Err(fault)),
                    Node::Body(body) => self.enter(body),
                    Node::Suspend(source) => {
                        if self.context.is_cancelled() {
                            Control::Deliver(Err(Fault::Cancelled))
                        } else {
                            self.suspensions += 1;
                            trace!(
                                run_id = %self.id,
                                source = source.kind(),
                                depth = self.frames.len(),
                                "Run suspended"
                            );
                            return Some(FrameResult::Suspend(source));
                        }
                    }
                    Node::Bind(inner, next) => {
                        self.frames.push(Frame::Then(next));
                        Control::Eval(*inner)
                    }
                    Node::Guard(inner, region) => {
                        self.frames.push(Frame::Handle(region));
                        Control::Eval(*inner)
                    }
                    Node::Finally(inner, action) => {
                        self.frames.push(Frame::Finally(action));
                        Control::Eval(*inner)
                    }
                },
                Control::Deliver(outcome) => match self.frames.pop() {
                    None => {
                        return Some(match outcome {
                            Ok(value) => FrameResult::Done(value),
                            Err(fault) => FrameResult::Faulted(fault),
                        })
                    }
                    Some(frame) => match frame.resume(outcome, self.context.is_cancelled()) {
                        Resumption::Enter(body) => self.enter(body),
                        Resumption::Deliver(outcome) => Control::Deliver(outcome),
                    },
                },
            };
            self.control = Some(next);
        }
    }

    /// Frame entry: the only place body code runs.
    fn enter(&self, body: Box<dyn FnOnce() -> Node + Send>) -> Control {
        if self.context.is_cancelled() {
            return Control::Deliver(Err(Fault::Cancelled));
        }
        match catch_unwind(AssertUnwindSafe(body)) {
            Ok(node) => Control::Eval(node),
            Err(payload) => Control::Deliver(Err(Fault::from_panic(payload))),
        }
    }

    /// Feed a suspension source's outcome back in.
    fn resume(&mut self, outcome: Outcome<Value>) {
        self.control = Some(Control::Deliver(outcome));
    }

    fn finish(&self, mode: &'static str, result: &FrameResult) {
        match result {
            FrameResult::Faulted(fault) => debug!(
                run_id = %self.id,
                mode,
                steps = self.steps,
                suspensions = self.suspensions,
                fault = %fault,
                "Run faulted"
            ),
            _ => debug!(
                run_id = %self.id,
                mode,
                steps = self.steps,
                suspensions = self.suspensions,
                "Run completed"
            ),
        }
    }

    fn into_outcome(result: FrameResult) -> Outcome<Value> {
        match result {
            FrameResult::Done(value) => Ok(value),
            FrameResult::Faulted(fault) => Err(fault),
            FrameResult::Suspend(_) => Err(Fault::composition("run stopped while suspended")),
        }
    }
}

/// Parking spot for a blocked `run_blocking` caller.
struct Signal {
    outcome: Mutex<Option<Outcome<Value>>>,
    ready: Condvar,
}

impl Signal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        })
    }

    fn set(&self, outcome: Outcome<Value>) {
        *self.outcome.lock() = Some(outcome);
        self.ready.notify_one();
    }

    fn wait(&self) -> Outcome<Value> {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.take() {
                return outcome;
            }
            self.ready.wait(&mut slot);
        }
    }
}

fn drive_blocking(machine: &mut Machine, services: &Services) -> Outcome<Value> {
    loop {
        match machine.advance(usize::MAX) {
            None => continue,
            Some(FrameResult::Suspend(source)) => {
                let signal = Signal::new();
                let parked = signal.clone();
                source.register(
                    services,
                    machine.context.cancellation(),
                    Box::new(move |outcome| parked.set(outcome)),
                );
                machine.resume(signal.wait());
            }
            Some(result) => {
                machine.finish("blocking", &result);
                return Machine::into_outcome(result);
            }
        }
    }
}

/// A run being stepped on the scheduler.
struct AsyncRun {
    machine: Machine,
    services: Services,
    budget: usize,
    complete: Resume,
}

/// Where a suspended async run waits for its source.
enum Handoff {
    /// The driver is still inside `register`.
    Registering,
    /// The source completed before `register` returned.
    Inline(Outcome<Value>),
    /// The driver left; the source's completion continues the run.
    Parked(Box<AsyncRun>),
    Resumed,
}

fn post_step(run: Box<AsyncRun>) {
    let scheduler = run.services.scheduler.clone();
    scheduler.post(Box::new(move || step_async(run)));
}

fn step_async(mut run: Box<AsyncRun>) {
    loop {
        match run.machine.advance(run.budget) {
            None => {
                trace!(run_id = %run.machine.id, "Slice budget spent, re-posting run");
                post_step(run);
                return;
            }
            Some(FrameResult::Suspend(source)) => {
                let handoff = Arc::new(Mutex::new(Handoff::Registering));
                let on_complete = handoff.clone();
                let cancellation = run.machine.context.cancellation().cloned();
                source.register(
                    &run.services,
                    cancellation.as_ref(),
                    Box::new(move |outcome| {
                        let mut slot = on_complete.lock();
                        match std::mem::replace(&mut *slot, Handoff::Resumed) {
                            Handoff::Registering => *slot = Handoff::Inline(outcome),
                            Handoff::Parked(mut run) => {
                                drop(slot);
                                run.machine.resume(outcome);
                                post_step(run);
                            }
                            Handoff::Inline(_) | Handoff::Resumed => {
                                warn!("Suspension source completed twice, ignoring");
                            }
                        }
                    }),
                );

                let mut slot = handoff.lock();
                match std::mem::replace(&mut *slot, Handoff::Resumed) {
                    Handoff::Inline(outcome) => {
                        drop(slot);
                        run.machine.resume(outcome);
                    }
                    _ => {
                        *slot = Handoff::Parked(run);
                        return;
                    }
                }
            }
            Some(result) => {
                run.machine.finish("future", &result);
                let AsyncRun { complete, .. } = *run;
                complete(Machine::into_outcome(result));
                return;
            }
        }
    }
}

/// Step an erased root on the scheduler, reporting to `complete`.
pub(crate) fn spawn_erased(
    root: Node,
    context: RunContext,
    services: Services,
    complete: Resume,
) {
    let budget = context.slice_budget();
    let machine = Machine::new(root, context);
    debug!(run_id = %machine.id, mode = "future", "Run started");
    post_step(Box::new(AsyncRun {
        machine,
        services,
        budget,
        complete,
    }));
}

/// Context for a nested child run: same scheduler, timer and cancellation.
pub(crate) fn child_context(
    services: &Services,
    cancellation: Option<&CancellationToken>,
) -> RunContext {
    RunContext {
        cancellation: cancellation.cloned(),
        scheduler: Some(services.scheduler.clone()),
        timer: Some(services.timer.clone()),
        max_steps_per_slice: None,
    }
}

/// A started, not yet driven computation.
///
/// Driving consumes the run, so it can be driven by exactly one driver.
pub struct Run<T> {
    machine: Machine,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Run<T> {
    pub(crate) fn new(root: Node, context: RunContext) -> Self {
        Self {
            machine: Machine::new(root, context),
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> RunId {
        self.machine.id
    }

    /// Drive to completion on the calling thread, parking on each suspension.
    pub fn run_blocking(mut self) -> Outcome<T> {
        debug!(run_id = %self.machine.id, mode = "blocking", "Run started");
        let services = self.machine.context.resolve_services()?;
        drive_blocking(&mut self.machine, &services).and_then(take_value::<T>)
    }

    /// Return immediately; the run is stepped on the scheduler and settles
    /// the returned future.
    pub fn run_as_future(self) -> HotFuture<T>
    where
        T: Clone,
    {
        let services = match self.machine.context.resolve_services() {
            Ok(services) => services,
            Err(fault) => return HotFuture::failed(fault),
        };
        let (promise, hot) = HotFuture::pending();
        let budget = self.machine.context.slice_budget();
        debug!(run_id = %self.machine.id, mode = "future", "Run started");
        post_step(Box::new(AsyncRun {
            machine: self.machine,
            services,
            budget,
            complete: Box::new(move |outcome| {
                promise.complete(outcome.and_then(take_value::<T>));
            }),
        }));
        hot
    }
}

impl<T> fmt::Debug for Run<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run").field("id", &self.machine.id).finish()
    }
}

/// Drive `computation` to completion on the calling thread.
///
/// `None` arguments mean no cancellation and the ambient scheduler.
pub fn run_blocking<T: Send + 'static>(
    computation: &Cold<T>,
    cancellation: Option<CancellationToken>,
    scheduler: Option<Arc<dyn Scheduler>>,
) -> Outcome<T> {
    computation
        .start(RunContext::from_parts(cancellation, scheduler))
        .run_blocking()
}

/// Start `computation` on the scheduler and return its hot future.
///
/// `None` arguments mean no cancellation and the ambient scheduler.
pub fn run_as_future<T: Clone + Send + 'static>(
    computation: &Cold<T>,
    cancellation: Option<CancellationToken>,
    scheduler: Option<Arc<dyn Scheduler>>,
) -> HotFuture<T> {
    computation
        .start(RunContext::from_parts(cancellation, scheduler))
        .run_as_future()
}
