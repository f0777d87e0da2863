use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::executor::{BacklogConfig, ExecutorConfig};
use crate::logging::LoggingConfig;
use crate::metrics::MetricsConfig;
use crate::validate;

// ---------------------------------------------------------------------------
// QueueConfig (resolved, validated)
// ---------------------------------------------------------------------------

/// Top-level configuration of a queue-mode pipeline, usually read from
/// `rulequeue.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub executor: ExecutorConfig,
    pub backlog: BacklogConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

impl QueueConfig {
    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.as_ref().display()))?;
        content.parse()
    }
}

impl FromStr for QueueConfig {
    type Err = anyhow::Error;

    /// Parse a TOML string into a validated [`QueueConfig`].
    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let config: QueueConfig = toml::from_str(toml_str)?;
        validate::validate(&config)?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
