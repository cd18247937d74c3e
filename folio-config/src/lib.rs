//! Typed settings for Folio components.
//!
//! Settings are layered: `config/default.toml`, then `config/{env}.toml` when an
//! environment name is given, then `FOLIO__SECTION__KEY` environment variables.

pub mod telemetry;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

pub use telemetry::init_tracing;

/// Default number of write attempts before an allocation gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 200;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FolioConfig {
    pub database: DatabaseConfig,
    pub sequence: SequenceConfig,
    pub log: LogConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/folio.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Upper bound of the collision-retry loop.
    pub max_attempts: u32,
    /// Records dated on or before this day skip the date/sequence consistency check.
    pub constraint_start_date: NaiveDate,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            constraint_start_date: NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

impl FolioConfig {
    fn validate(&self) -> Result<()> {
        if self.sequence.max_attempts == 0 {
            bail!("sequence.max_attempts must be at least 1");
        }
        if self.log.level.trim().is_empty() {
            bail!("log.level must not be empty");
        }
        Ok(())
    }
}

/// Load settings from the `config/` directory of the working directory.
pub fn load_config(env: Option<&str>) -> Result<FolioConfig> {
    load_config_from(Path::new("config"), env)
}

/// Load settings from an explicit configuration directory.
pub fn load_config_from(dir: &Path, env: Option<&str>) -> Result<FolioConfig> {
    let mut builder =
        Config::builder().add_source(File::from(dir.join("default.toml")).required(false));
    if let Some(env) = env {
        builder = builder.add_source(File::from(dir.join(format!("{env}.toml"))).required(false));
    }
    let settings = builder
        .add_source(Environment::with_prefix("FOLIO").separator("__"))
        .build()
        .with_context(|| format!("failed to read configuration from {}", dir.display()))?;
    let config: FolioConfig = settings
        .try_deserialize()
        .context("invalid folio configuration")?;
    config.validate()?;
    Ok(config)
}
