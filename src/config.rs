use crate::default_struct;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("{key} must be a positive number of seconds, got {value:?}")]
    InvalidSeconds { key: &'static str, value: String },
}

default_struct! {
#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub data_path: String = "data/pickems.db".to_string(),
    pub teams_path: Option<String>,
    pub resolve_interval: u64 = 300,
    pub flush_interval: u64 = 30,
    pub fetch_timeout: u64 = 10,
}
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config {
            token: lookup("DISCORD_TOKEN").ok_or(ConfigError::Missing("DISCORD_TOKEN"))?,
            ..Default::default()
        };

        if let Some(path) = lookup("PICKEMS_DATA_PATH") {
            config.data_path = path;
        }
        config.teams_path = lookup("PICKEMS_TEAMS_PATH").filter(|p| !p.is_empty());

        let seconds = |key: &'static str, fallback: u64| match lookup(key) {
            None => Ok(fallback),
            Some(value) => {
                let parsed = value.trim().parse::<u64>();
                match parsed {
                    Ok(n) if n > 0 => Ok(n),
                    _ => Err(ConfigError::InvalidSeconds { key, value }),
                }
            }
        };
        config.resolve_interval = seconds("PICKEMS_RESOLVE_INTERVAL", config.resolve_interval)?;
        config.flush_interval = seconds("PICKEMS_FLUSH_INTERVAL", config.flush_interval)?;
        config.fetch_timeout = seconds("PICKEMS_FETCH_TIMEOUT", config.fetch_timeout)?;

        Ok(config)
    }

    pub fn resolve_every(&self) -> Duration {
        Duration::from_secs(self.resolve_interval)
    }

    pub fn flush_every(&self) -> Duration {
        Duration::from_secs(self.flush_interval)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }
}
