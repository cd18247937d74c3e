use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::LogConfig;

/// Install the global tracing subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}
