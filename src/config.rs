//! Broker configuration.
use anyhow::{bail, Context};
use ::config::{Config, Environment};
use serde::Deserialize;

/// Tunables shared by the broker's collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerConfig {
    /// Number of messages kept by [RecentMessages](crate::history::RecentMessages).
    pub history_capacity: usize,
    /// Number of jobs a [WorkerPool](crate::pool::WorkerPool) runs at once.
    pub workers: usize,
}

impl BrokerConfig {
    pub const DEFAULT_HISTORY_CAPACITY: usize = 10;
    pub const DEFAULT_WORKERS: usize = 4;

    /// Prefix of the environment variables read by [BrokerConfig::from_env],
    /// e.g. `FANPOST_HISTORY_CAPACITY` and `FANPOST_WORKERS`.
    pub const ENV_PREFIX: &'static str = "FANPOST";

    /// Read the configuration from the process environment, falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Self::from_environment(Environment::with_prefix(Self::ENV_PREFIX))
    }

    fn from_environment(environment: Environment) -> Result<Self, anyhow::Error> {
        let config = Config::builder()
            .set_default("history_capacity", Self::DEFAULT_HISTORY_CAPACITY as i64)?
            .set_default("workers", Self::DEFAULT_WORKERS as i64)?
            .add_source(environment.try_parsing(true))
            .build()
            .context("could not load broker configuration")?;
        let settings: Self = config
            .try_deserialize()
            .context("invalid broker configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.history_capacity == 0 {
            bail!("history_capacity must be greater than zero");
        }
        if self.workers == 0 {
            bail!("workers must be greater than zero");
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            history_capacity: Self::DEFAULT_HISTORY_CAPACITY,
            workers: Self::DEFAULT_WORKERS,
        }
    }
}
