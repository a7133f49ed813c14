//! Single entry point for loading configuration.

use super::merge::merge_policy;
use super::sources::{env_vars, explicit_file, global_file};
use super::FasyncConfig;
use crate::error::SetupError;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration: defaults, global file, optional explicit file, environment.
    pub fn load(config_path: Option<&Path>) -> Result<FasyncConfig, SetupError> {
        let mut builder = merge_policy::builder_with_defaults()?;
        builder = global_file::add_to_builder(builder)?;
        if let Some(path) = config_path {
            builder = explicit_file::add_to_builder(builder, path)?;
        }
        builder = env_vars::add_to_builder(builder);

        let config: FasyncConfig = builder.build()?.try_deserialize()?;
        debug!(
            explicit_file = ?config_path,
            worker_threads = ?config.runtime.worker_threads,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Load configuration from one file only (defaults still apply).
    pub fn load_from_file(path: &Path) -> Result<FasyncConfig, SetupError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = explicit_file::add_to_builder(builder, path)?;
        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }
}
