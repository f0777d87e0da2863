use serde::Deserialize;

use crate::types::{AdmissionPolicy, HumanDuration};

/// Queue-mode executor settings. Every field has a default so the whole
/// `[executor]` section may be omitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on concurrently running evaluation tasks (Semaphore permits).
    pub worker_pool_size: usize,
    /// Behaviour when the pool is saturated.
    pub admission: AdmissionPolicy,
    /// Per work item evaluation timeout. `None` lets evaluations run forever.
    pub eval_timeout: Option<HumanDuration>,
    /// How long shutdown waits for cancelled evaluations before aborting them.
    pub shutdown_timeout: HumanDuration,
    /// Capacity of the input endpoint created by `QueueExecutor::start`.
    pub input_capacity: usize,
    /// Capacity of the output endpoint created by `QueueExecutor::start`.
    pub output_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 64,
            admission: AdmissionPolicy::Block,
            eval_timeout: None,
            shutdown_timeout: "5s".parse().expect("hardcoded duration must parse"),
            input_capacity: 64,
            output_capacity: 1,
        }
    }
}

/// Fan-in backlog settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BacklogConfig {
    /// Backlog length at which an advisory warning is logged. The backlog is
    /// never truncated.
    pub high_water_mark: Option<usize>,
}
