//! Engine configuration.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Each key can be overridden by an environment variable named
//! `INTENTFUL_<KEY>`, e.g. `INTENTFUL_DIFF_RESOLVE_DELAY=500`.
//!
//! # Example
//!
//! ```toml
//! server_port = 3000
//! diff_resolve_delay = 1500
//! diff_retry_exponent = 1.3
//! logging_level = "debug"
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix of environment variables that override config keys.
pub const ENV_PREFIX: &str = "INTENTFUL_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read '{path}': {message}")]
    Read { path: String, message: String },

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value '{value}' for {var}")]
    Env { var: String, value: String },

    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Entities pulled into the watchlist per random rediscovery batch.
    pub entity_batch_size: usize,
    /// Seconds a terminal intent watcher is kept before deletion.
    pub deleted_watcher_persist_time: u64,
    /// Change listener poll interval, milliseconds.
    pub entity_poll_delay: u64,
    /// Intent resolver interval, milliseconds.
    pub intent_resolve_delay: u64,
    /// Diff resolver interval, milliseconds.
    pub diff_resolve_delay: u64,
    pub diff_retry_exponent: f64,
    /// Upper bound of any computed retry delay, seconds.
    pub max_backoff: f64,
    /// Timeout of one outbound handler call, seconds.
    pub handler_timeout: u64,
    /// Smaller retry jitter, for tests and local runs.
    pub debug: bool,
    pub logging_level: String,
    pub pretty_print: bool,
    pub server_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            entity_batch_size: 5,
            deleted_watcher_persist_time: 100,
            entity_poll_delay: 250,
            intent_resolve_delay: 3000,
            diff_resolve_delay: 1500,
            diff_retry_exponent: 1.3,
            max_backoff: 100.0,
            handler_timeout: 10,
            debug: false,
            logging_level: "info".to_string(),
            pretty_print: true,
            server_port: 3000,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loop intervals must be positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("entity_poll_delay", self.entity_poll_delay),
            ("intent_resolve_delay", self.intent_resolve_delay),
            ("diff_resolve_delay", self.diff_resolve_delay),
        ];
        for (key, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    message: "must be at least 1 millisecond".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Read `path` (if given), then apply `INTENTFUL_*` overrides from the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    })?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `(name, value)` pairs. Names without the
    /// `INTENTFUL_` prefix, or for unknown keys, are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (var, value) in vars {
            let Some(key) = var.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match key.to_ascii_lowercase().as_str() {
                "entity_batch_size" => self.entity_batch_size = parse_env(&var, &value)?,
                "deleted_watcher_persist_time" => {
                    self.deleted_watcher_persist_time = parse_env(&var, &value)?
                }
                "entity_poll_delay" => self.entity_poll_delay = parse_env(&var, &value)?,
                "intent_resolve_delay" => self.intent_resolve_delay = parse_env(&var, &value)?,
                "diff_resolve_delay" => self.diff_resolve_delay = parse_env(&var, &value)?,
                "diff_retry_exponent" => self.diff_retry_exponent = parse_env(&var, &value)?,
                "max_backoff" => self.max_backoff = parse_env(&var, &value)?,
                "handler_timeout" => self.handler_timeout = parse_env(&var, &value)?,
                "debug" => self.debug = parse_env(&var, &value)?,
                "logging_level" => self.logging_level = value,
                "pretty_print" => self.pretty_print = parse_env(&var, &value)?,
                "server_port" => self.server_port = parse_env(&var, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn diff_resolve_interval(&self) -> Duration {
        Duration::from_millis(self.diff_resolve_delay)
    }

    pub fn intent_resolve_interval(&self) -> Duration {
        Duration::from_millis(self.intent_resolve_delay)
    }

    pub fn entity_poll_interval(&self) -> Duration {
        Duration::from_millis(self.entity_poll_delay)
    }

    pub fn watcher_expiry(&self) -> Duration {
        Duration::from_secs(self.deleted_watcher_persist_time)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout)
    }
}

fn parse_env<T: FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}
