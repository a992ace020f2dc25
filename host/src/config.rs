//! Host configuration.
//!
//! Loaded from environment variables (a `.env` file is read first when
//! present) with defaults for everything.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed
    #[error("invalid value {value:?} for {key}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
    },
}

/// Host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Settings file holding the capture flag
    pub settings_path: PathBuf,
    /// Replay request timeout in seconds
    pub request_timeout_secs: u64,
    /// `User-Agent` for replays that do not set one
    pub user_agent: String,
    /// How long shutdown waits for in-flight replays, in seconds
    pub shutdown_timeout_secs: u64,
    /// Prometheus scrape address; metrics are off when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from("repeater-settings.json"),
            request_timeout_secs: 30,
            user_agent: concat!("repeater/", env!("CARGO_PKG_VERSION")).to_string(),
            shutdown_timeout_secs: 5,
            metrics_addr: None,
        }
    }
}

impl Config {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a variable is set to a value
    /// that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a variable does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            settings_path: get("REPEATER_SETTINGS_PATH")
                .map_or(defaults.settings_path, PathBuf::from),
            request_timeout_secs: parse_or(
                "REPEATER_REQUEST_TIMEOUT_SECS",
                get("REPEATER_REQUEST_TIMEOUT_SECS"),
                defaults.request_timeout_secs,
            )?,
            user_agent: get("REPEATER_USER_AGENT").unwrap_or(defaults.user_agent),
            shutdown_timeout_secs: parse_or(
                "REPEATER_SHUTDOWN_TIMEOUT_SECS",
                get("REPEATER_SHUTDOWN_TIMEOUT_SECS"),
                defaults.shutdown_timeout_secs,
            )?,
            metrics_addr: get("REPEATER_METRICS_ADDR")
                .map(|value| parse("REPEATER_METRICS_ADDR", &value))
                .transpose()?,
        })
    }

    /// Replay request timeout
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Shutdown grace period
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    value.map_or(Ok(default), |value| parse(key, &value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("REPEATER_SETTINGS_PATH", "/tmp/r.json"),
            ("REPEATER_REQUEST_TIMEOUT_SECS", "5"),
            ("REPEATER_USER_AGENT", "probe/1"),
            ("REPEATER_SHUTDOWN_TIMEOUT_SECS", " 1 "),
            ("REPEATER_METRICS_ADDR", "127.0.0.1:9100"),
        ]))
        .unwrap();

        assert_eq!(config.settings_path, PathBuf::from("/tmp/r.json"));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.user_agent, "probe/1");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(1));
        assert_eq!(config.metrics_addr, Some("127.0.0.1:9100".parse().unwrap()));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = Config::from_lookup(lookup(&[("REPEATER_USER_AGENT", "  ")])).unwrap();
        assert_eq!(config.user_agent, Config::default().user_agent);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = Config::from_lookup(lookup(&[("REPEATER_REQUEST_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "REPEATER_REQUEST_TIMEOUT_SECS",
                value: "soon".into()
            }
        );

        let err = Config::from_lookup(lookup(&[("REPEATER_METRICS_ADDR", "localhost")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "REPEATER_METRICS_ADDR", .. }));
    }
}
