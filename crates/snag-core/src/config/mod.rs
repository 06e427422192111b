//! Client sync configuration loaded from the environment.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::util::{normalize_base_url, normalize_text_option};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What a pull does when its scope still has unpushed entries after a flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Log and pull anyway; pending local writes win on their next push
    #[default]
    Proceed,
    /// Log and skip this pull cycle
    SkipPull,
}

impl fmt::Display for FlushPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Proceed => "proceed",
            Self::SkipPull => "skip",
        })
    }
}

impl FromStr for FlushPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proceed" => Ok(Self::Proceed),
            "skip" | "skip_pull" | "skip-pull" => Ok(Self::SkipPull),
            other => Err(ConfigError::Invalid(format!(
                "SNAG_FLUSH_POLICY must be 'proceed' or 'skip', got '{other}'"
            ))),
        }
    }
}

/// Settings for a syncing client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub api_url: String,
    pub sync_interval: Duration,
    pub http_timeout: Duration,
    pub flush_policy: FlushPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            flush_policy: FlushPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_url = value_or_default(&lookup, "SNAG_API_URL", DEFAULT_API_URL);
        let api_url = normalize_base_url(&raw_url).ok_or_else(|| {
            ConfigError::Invalid("SNAG_API_URL must start with http:// or https://".to_string())
        })?;

        let sync_interval = seconds_in_range(
            &lookup,
            "SNAG_SYNC_INTERVAL_SECS",
            DEFAULT_SYNC_INTERVAL_SECS,
            5..=3600,
        )?;
        let http_timeout = seconds_in_range(
            &lookup,
            "SNAG_HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
            1..=120,
        )?;

        let flush_policy = match optional_trimmed(&lookup, "SNAG_FLUSH_POLICY") {
            Some(value) => value.parse()?,
            None => FlushPolicy::default(),
        };

        Ok(Self {
            api_url,
            sync_interval,
            http_timeout,
            flush_policy,
        })
    }

    /// Override the API URL (e.g. from a CLI flag)
    pub fn with_api_url(mut self, api_url: &str) -> Result<Self, ConfigError> {
        self.api_url = normalize_base_url(api_url).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "API URL must start with http:// or https://, got '{api_url}'"
            ))
        })?;
        Ok(self)
    }
}

fn seconds_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<Duration, ConfigError> {
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer between {} and {}",
            range.start(),
            range.end()
        ))
    };

    let seconds = match optional_trimmed(lookup, name) {
        Some(value) => value.parse::<u64>().map_err(|_| invalid())?,
        None => default,
    };
    if !range.contains(&seconds) {
        return Err(invalid());
    }
    Ok(Duration::from_secs(seconds))
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}
