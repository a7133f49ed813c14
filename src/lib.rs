//! Fasync: Cold Asynchronous Computations
//!
//! Explicitly started, composable units of asynchronous work. A [`Cold`]
//! computation is inert until handed to a driver ([`run_blocking`] or
//! [`run_as_future`]); it interoperates with eagerly started [`HotFuture`]s and
//! with timer/yield suspension points, supports exception filters with
//! predicates, and runs any number of sequential suspensions in constant stack
//! depth.

pub mod cancel;
pub mod cold;
pub mod config;
pub mod driver;
pub mod error;
pub mod filter;
mod frame;
pub mod hot;
pub mod logging;
pub mod scheduler;
pub mod source;

pub use cancel::CancellationToken;
pub use cold::{sleep, yield_now, Cold};
pub use driver::{run_as_future, run_blocking, Run, RunContext, RunId};
pub use error::{Fault, FaultKind, Outcome, UserFault};
pub use filter::Handlers;
pub use hot::{HotFuture, Promise};
pub use scheduler::{Job, Scheduler, Timer, TokioScheduler};
pub use source::SuspensionSource;
