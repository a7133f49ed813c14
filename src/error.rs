//! Error types for cold computations.
//!
//! `Fault` is the single failure type that flows through a run: body faults,
//! cancellation and composition misuse all travel the same frame chain and are
//! matched by the exception filters in [`crate::filter`]. `SetupError` covers
//! the ambient layer (configuration, logging, runtime construction).

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Terminal or in-flight outcome of a computation step.
pub type Outcome<T> = Result<T, Fault>;

/// Fault raised by computation body logic.
///
/// The payload is an `anyhow::Error` shared behind an `Arc`, so a fault can be
/// delivered to every subscriber of a hot future and still be matched by its
/// concrete error type.
#[derive(Clone)]
pub struct UserFault {
    inner: Arc<anyhow::Error>,
}

impl UserFault {
    /// Wrap a concrete error value.
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(anyhow::Error::new(err)),
        }
    }

    /// Build a fault from a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(anyhow::Error::msg(message)),
        }
    }

    pub fn from_anyhow(err: anyhow::Error) -> Self {
        Self {
            inner: Arc::new(err),
        }
    }

    /// Borrow the payload as `E` if that is its concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.is::<E>()
    }

    pub fn as_anyhow(&self) -> &anyhow::Error {
        &self.inner
    }
}

impl fmt::Debug for UserFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}

impl fmt::Display for UserFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

/// Fault category, used by category-only exception filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    User,
    /// Filter regions are skipped once the run's own token is signalled, so
    /// only a cancellation arriving from elsewhere (a hot future or a
    /// hand-built `Fault::Cancelled`) can be matched by a handler.
    Cancelled,
    Composition,
    Panicked,
}

/// Failure carried by a run
#[derive(Debug, Clone, Error)]
pub enum Fault {
    #[error("{0}")]
    User(UserFault),

    #[error("computation cancelled")]
    Cancelled,

    #[error("composition fault: {0}")]
    Composition(String),

    #[error("computation body panicked: {0}")]
    Panicked(String),
}

impl Fault {
    /// Wrap a concrete error as a user fault.
    pub fn user<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Fault::User(UserFault::new(err))
    }

    /// User fault with a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Fault::User(UserFault::msg(message))
    }

    pub fn composition(reason: impl Into<String>) -> Self {
        Fault::Composition(reason.into())
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            Fault::User(_) => FaultKind::User,
            Fault::Cancelled => FaultKind::Cancelled,
            Fault::Composition(_) => FaultKind::Composition,
            Fault::Panicked(_) => FaultKind::Panicked,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Fault::Cancelled)
    }

    /// Borrow a user fault's payload as `E`. Always `None` for other categories.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Fault::User(user) => user.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Render a caught panic payload into a fault.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Fault::Panicked(message)
    }
}

impl From<anyhow::Error> for Fault {
    fn from(err: anyhow::Error) -> Self {
        Fault::User(UserFault::from_anyhow(err))
    }
}

/// Errors raised while setting up the ambient layer
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Logging error: {0}")]
    LoggingError(String),

    #[error("Runtime error: {0}")]
    RuntimeError(#[from] std::io::Error),
}

impl From<config::ConfigError> for SetupError {
    fn from(err: config::ConfigError) -> Self {
        SetupError::ConfigError(err.to_string())
    }
}
