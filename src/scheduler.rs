//! Execution scheduler and timer service.
//!
//! The driver only needs two capabilities from its host: `post` a callback to
//! run later/elsewhere, and run a callback `after` a delay. Both are traits so
//! callers can plug their own executor in; the ambient default is a lazily built
//! multi-thread tokio runtime configured from [`RuntimeConfig`].

use crate::error::SetupError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info};

/// Unit of work handed to a scheduler.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Accepts callbacks to run later, possibly on another thread.
pub trait Scheduler: Send + Sync {
    fn post(&self, job: Job);
}

/// Runs callbacks after a delay.
pub trait Timer: Send + Sync {
    fn after(&self, delay: Duration, job: Job);
}

/// Ambient runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads for the ambient runtime (tokio default when unset)
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Name given to ambient worker threads
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// Consecutive synchronous steps a future-producing run may take before
    /// re-posting itself to the scheduler
    #[serde(default = "default_max_steps_per_slice")]
    pub max_steps_per_slice: usize,
}

fn default_thread_name() -> String {
    "fasync-worker".to_string()
}

fn default_max_steps_per_slice() -> usize {
    1024
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            thread_name: default_thread_name(),
            max_steps_per_slice: default_max_steps_per_slice(),
        }
    }
}

impl RuntimeConfig {
    /// Validate runtime configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_threads == Some(0) {
            return Err("worker_threads must be at least 1".to_string());
        }
        if self.thread_name.trim().is_empty() {
            return Err("thread_name cannot be empty".to_string());
        }
        if self.max_steps_per_slice == 0 {
            return Err("max_steps_per_slice must be at least 1".to_string());
        }
        Ok(())
    }

    fn build_runtime(&self) -> Result<Runtime, SetupError> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_time().thread_name(self.thread_name.clone());
        if let Some(threads) = self.worker_threads {
            builder.worker_threads(threads);
        }
        Ok(builder.build()?)
    }
}

struct Ambient {
    runtime: Runtime,
    config: RuntimeConfig,
}

static AMBIENT: OnceLock<Ambient> = OnceLock::new();

/// Build the ambient runtime from `config`.
///
/// Returns `Ok(false)` when the ambient runtime already exists; the first
/// installed configuration stays in effect for the life of the process.
pub fn install_ambient(config: &RuntimeConfig) -> Result<bool, SetupError> {
    // A losing runtime must never be built: dropping one inside async code panics.
    static INSTALL: Mutex<()> = parking_lot::const_mutex(());
    let _guard = INSTALL.lock();
    if AMBIENT.get().is_some() {
        return Ok(false);
    }
    config.validate().map_err(SetupError::ConfigError)?;
    let runtime = config.build_runtime()?;
    let installed = AMBIENT
        .set(Ambient {
            runtime,
            config: config.clone(),
        })
        .is_ok();
    if installed {
        info!(
            worker_threads = ?config.worker_threads,
            thread_name = %config.thread_name,
            "Ambient runtime started"
        );
    }
    Ok(installed)
}

fn ambient() -> Result<&'static Ambient, SetupError> {
    if let Some(ambient) = AMBIENT.get() {
        return Ok(ambient);
    }
    install_ambient(&RuntimeConfig::default())?;
    AMBIENT
        .get()
        .ok_or_else(|| SetupError::ConfigError("ambient runtime unavailable".to_string()))
}

/// Configuration the ambient runtime was built with (defaults if not built yet).
pub fn ambient_config() -> RuntimeConfig {
    AMBIENT
        .get()
        .map(|ambient| ambient.config.clone())
        .unwrap_or_default()
}

/// Scheduler and timer backed by a tokio runtime handle.
///
/// The runtime behind the handle must have its time driver enabled for
/// non-zero delays.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler over the ambient runtime, building it on first use.
    pub fn ambient() -> Result<Self, SetupError> {
        Ok(Self::new(ambient()?.runtime.handle().clone()))
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Scheduler for TokioScheduler {
    fn post(&self, job: Job) {
        self.handle.spawn(async move { job() });
    }
}

impl Timer for TokioScheduler {
    fn after(&self, delay: Duration, job: Job) {
        // A zero delay never touches the timer wheel.
        if delay.is_zero() {
            self.post(job);
            return;
        }
        debug!(delay_ms = delay.as_millis() as u64, "Timer armed");
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            job();
        });
    }
}

/// Ambient scheduler/timer pair as trait objects.
pub(crate) fn ambient_services() -> Result<(Arc<dyn Scheduler>, Arc<dyn Timer>), SetupError> {
    let scheduler = Arc::new(TokioScheduler::ambient()?);
    Ok((scheduler.clone(), scheduler))
}
