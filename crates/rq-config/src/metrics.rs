use serde::Deserialize;

use crate::types::HumanDuration;

/// Pipeline metrics settings.
///
/// When disabled, no periodic snapshot task is spawned.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_report_interval")]
    pub report_interval: HumanDuration,
}

fn default_report_interval() -> HumanDuration {
    "10s".parse().expect("hardcoded duration must parse")
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            report_interval: default_report_interval(),
        }
    }
}
