use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::budget::BudgetConfig;
use crate::engine::ExecutorConfig;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub budget: BudgetConfig,
    pub executor: ExecutorConfig,
}

impl Config {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// A TOML file with environment overrides applied on top.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(quota) = parse_var(&lookup, "CADENCE_DAILY_QUOTA")? {
            self.budget.daily_quota = quota;
        }
        if let Some(enabled) = parse_var(&lookup, "CADENCE_EMERGENCY_SHUTDOWN")? {
            self.budget.emergency_shutdown_enabled = enabled;
        }
        if let Some(delay) = parse_var(&lookup, "CADENCE_ACTION_DELAY_MS")? {
            self.executor.action_delay_ms = delay;
        }
        if let Some(delay) = parse_var(&lookup, "CADENCE_GROUP_DELAY_MS")? {
            self.executor.group_delay_ms = delay;
        }

        self.budget.validate()?;
        Ok(self)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<T>() {
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            value: raw,
        }),
    }
}
