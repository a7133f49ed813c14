//! Environment source: FASYNC__<SECTION>__<KEY>, e.g. FASYNC__RUNTIME__WORKER_THREADS=4.
//!
//! The double underscore keeps these apart from the logging overrides
//! (FASYNC_LOG, FASYNC_LOG_FORMAT, ...) read by `logging::init_logging`.

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::Environment;

pub const ENV_PREFIX: &str = "FASYNC";

pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    )
}
