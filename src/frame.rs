//! Instructions and continuation frames.
//!
//! Starting a cold computation instantiates a [`Node`]: an inert instruction
//! tree whose leaves are body thunks and suspension sources. While driving, the
//! engine unfolds nodes into a stack of [`Frame`]s, each one a paused point
//! waiting for an incoming value or fault. Values cross the frame chain
//! type-erased; the typed API in [`crate::cold`] is the only producer and
//! consumer of them.

use crate::error::{Fault, Outcome};
use crate::filter::FilterRegion;
use crate::source::SuspensionSource;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::trace;

/// Type-erased value travelling between frames.
pub(crate) type Value = Box<dyn Any + Send>;

/// Body code, executed at frame entry.
pub(crate) type Body = Box<dyn FnOnce() -> Node + Send>;

pub(crate) type Continuation = Box<dyn FnOnce(Value) -> Node + Send>;

pub(crate) type FinallyAction = Arc<dyn Fn() + Send + Sync>;

/// One instruction of a started computation.
pub(crate) enum Node {
    /// Finished with a value.
    Done(Value),
    /// Finished with a fault.
    Faulted(Fault),
    /// Run body code, producing the next instruction.
    Body(Body),
    /// Pause until the source completes; its outcome becomes the incoming value.
    Suspend(SuspensionSource),
    /// Evaluate the inner node, then feed its value to the continuation.
    Bind(Box<Node>, Continuation),
    /// Evaluate the inner node inside an exception filter region.
    Guard(Box<Node>, Arc<FilterRegion>),
    /// Evaluate the inner node, then run the action whatever the outcome.
    Finally(Box<Node>, FinallyAction),
}

impl Node {
    pub(crate) fn from_outcome(outcome: Outcome<Value>) -> Self {
        match outcome {
            Ok(value) => Node::Done(value),
            Err(fault) => Node::Faulted(fault),
        }
    }
}

/// Paused point in the frame chain.
pub(crate) enum Frame {
    Then(Continuation),
    Handle(Arc<FilterRegion>),
    Finally(FinallyAction),
}

/// What a frame does with its incoming outcome.
pub(crate) enum Resumption {
    /// Enter body code (continuation or handler).
    Enter(Body),
    /// Hand the outcome on to the next enclosing frame.
    Deliver(Outcome<Value>),
}

/// Result of advancing a run until it can go no further on its own.
pub(crate) enum FrameResult {
    Suspend(SuspensionSource),
    Done(Value),
    Faulted(Fault),
}

impl Frame {
    /// Feed an incoming outcome to this frame.
    ///
    /// A cancelled run never enters a handler: the fault passes every filter
    /// region untouched. `Finally` actions still run.
    pub(crate) fn resume(self, incoming: Outcome<Value>, cancelled: bool) -> Resumption {
        match (self, incoming) {
            (Frame::Then(next), Ok(value)) => Resumption::Enter(Box::new(move || next(value))),
            (Frame::Then(_), Err(fault)) => Resumption::Deliver(Err(fault)),
            (Frame::Handle(_), Ok(value)) => Resumption::Deliver(Ok(value)),
            (Frame::Handle(region), Err(fault)) => {
                if cancelled {
                    return Resumption::Deliver(Err(fault));
                }
                match region.select(&fault) {
                    Some((index, handler)) => {
                        trace!(handler = index, fault = %fault, "Fault handled by filter");
                        Resumption::Enter(Box::new(move || handler(fault)))
                    }
                    None => Resumption::Deliver(Err(fault)),
                }
            }
            (Frame::Finally(action), outcome) => {
                match catch_unwind(AssertUnwindSafe(|| action())) {
                    Ok(()) => Resumption::Deliver(outcome),
                    Err(payload) => Resumption::Deliver(Err(Fault::from_panic(payload))),
                }
            }
        }
    }
}
