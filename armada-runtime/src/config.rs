//! Session configuration.
//!
//! Values come from [`SessionConfig::default`], a TOML document, or `ARMADA_*`
//! environment variables layered over the defaults.

use armada_core::{ArmadaError, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PARTITION: &str = "default";
const DEFAULT_CACHE_ROOT: &str = "/cache/shared";
const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Settings shared by every handle and invocation of a session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Backend partition that receives submitted invocations.
    pub partition: String,
    /// Root of the worker object cache.
    pub cache_root: PathBuf,
    /// Delay between status polls while waiting on a handle.
    pub poll_interval_ms: u64,
    /// Upper bound applied by `ResultHandle::wait`. `None` waits forever.
    pub wait_timeout_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            partition: DEFAULT_PARTITION.to_string(),
            cache_root: PathBuf::from(DEFAULT_CACHE_ROOT),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            wait_timeout_ms: None,
        }
    }
}

impl SessionConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source)
            .map_err(|e| ArmadaError::Argument(format!("invalid session config: {e}")))
    }

    /// Defaults overridden by `ARMADA_PARTITION`, `ARMADA_CACHE_ROOT`,
    /// `ARMADA_POLL_INTERVAL_MS` and `ARMADA_WAIT_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// Unparsable numbers are ignored with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(partition) = lookup("ARMADA_PARTITION").filter(|v| !v.trim().is_empty()) {
            config.partition = partition.trim().to_string();
        }
        if let Some(root) = lookup("ARMADA_CACHE_ROOT").filter(|v| !v.trim().is_empty()) {
            config.cache_root = PathBuf::from(root.trim());
        }
        if let Some(ms) = parse_millis(&lookup, "ARMADA_POLL_INTERVAL_MS") {
            config.poll_interval_ms = ms.max(1);
        }
        if let Some(ms) = parse_millis(&lookup, "ARMADA_WAIT_TIMEOUT_MS") {
            config.wait_timeout_ms = (ms > 0).then_some(ms);
        }
        config
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = saturating_millis(interval).max(1);
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout_ms = timeout.map(saturating_millis);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_millis<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable duration");
            None
        }
    }
}
