//! Configuration System
//!
//! Layered configuration for the ambient runtime and logging. Sources are merged
//! in order: built-in defaults, the global config file, an explicit config
//! file, then `FASYNC__*` environment variables.

use crate::error::SetupError;
use crate::logging::LoggingConfig;
use crate::scheduler::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

mod facade;
mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod env_vars;
    pub mod explicit_file;
    pub mod global_file;
}

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FasyncConfig {
    /// Ambient runtime settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Runtime(String),
    Logging(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Runtime(msg) => write!(f, "Runtime: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl FasyncConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.runtime.validate() {
            errors.push(ValidationError::Runtime(e));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate, then build the ambient runtime from this configuration.
    pub fn install(&self) -> Result<bool, SetupError> {
        self.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            SetupError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })?;
        crate::scheduler::install_ambient(&self.runtime)
    }
}
