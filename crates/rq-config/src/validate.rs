use crate::queue::QueueConfig;

/// Internal validation, called automatically during `QueueConfig::from_str` / `load`.
pub(crate) fn validate(config: &QueueConfig) -> anyhow::Result<()> {
    let exec = &config.executor;

    if exec.worker_pool_size == 0 {
        anyhow::bail!("executor.worker_pool_size must be > 0");
    }
    if exec.input_capacity == 0 {
        anyhow::bail!("executor.input_capacity must be > 0");
    }
    // tokio mpsc channels panic on zero capacity; there is no rendezvous mode.
    if exec.output_capacity == 0 {
        anyhow::bail!("executor.output_capacity must be > 0");
    }
    if let Some(timeout) = exec.eval_timeout
        && timeout.is_zero()
    {
        anyhow::bail!("executor.eval_timeout must be > 0 when set");
    }

    if config.backlog.high_water_mark == Some(0) {
        anyhow::bail!("backlog.high_water_mark must be > 0 when set");
    }

    if config.metrics.report_interval.is_zero() {
        anyhow::bail!("metrics.report_interval must be > 0");
    }

    Ok(())
}
