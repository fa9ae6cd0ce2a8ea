//! Tracer configuration
//!
//! Defaults come from `calltrace-common`; a JSON file can override any subset
//! of fields, and CLI flags override the file.

use std::path::Path;

use anyhow::{Context, Result};
use calltrace_common::{
    DEFAULT_HARVEST_INTERVAL_MS, DEFAULT_HEALTHY_TIMEOUT_MS, DEFAULT_UNHEALTHY_TIMEOUT_MS,
    MAX_SPANS,
};
use serde::{Deserialize, Serialize};

use crate::domain::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Master switch; when false every controller operation is a no-op
    pub enabled: bool,
    /// Idle time before a trace is completed as healthy
    pub healthy_timeout_ms: u64,
    /// Absolute age before a trace is completed as unhealthy
    pub unhealthy_timeout_ms: u64,
    /// Span limit per interaction trace
    pub max_spans: usize,
    /// Period of the background harvest loop
    pub harvest_interval_ms: u64,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            healthy_timeout_ms: DEFAULT_HEALTHY_TIMEOUT_MS,
            unhealthy_timeout_ms: DEFAULT_UNHEALTHY_TIMEOUT_MS,
            max_spans: MAX_SPANS,
            harvest_interval_ms: DEFAULT_HARVEST_INTERVAL_MS,
        }
    }
}

impl TracerConfig {
    /// Load a config from a JSON file; missing fields keep their defaults
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid JSON
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    #[must_use]
    pub fn healthy_timeout(&self) -> Duration {
        Duration::from_millis(self.healthy_timeout_ms)
    }

    #[must_use]
    pub fn unhealthy_timeout(&self) -> Duration {
        Duration::from_millis(self.unhealthy_timeout_ms)
    }

    #[must_use]
    pub fn harvest_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.harvest_interval_ms)
    }
}
