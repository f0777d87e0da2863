use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rq_config::{BacklogConfig, ExecutorConfig, QueueConfig};
use rq_core::{ResultSource, RuleParser};

use crate::dispatcher::Dispatcher;
use crate::fault::FaultReporter;
use crate::lifecycle::{PipelineHandle, TaskGroup};
use crate::metrics::{PipelineMetrics, run_metrics_reporter};
use crate::multiplexer::Multiplexer;

// ---------------------------------------------------------------------------
// QueueExecutor: asynchronous queue-mode execution
// ---------------------------------------------------------------------------

/// Runs a [`RuleParser`] in queue mode.
///
/// Work items sent on the input endpoint are fanned out to concurrent
/// evaluation tasks. The parser publishes its outcomes to a sink whose read
/// side is `results`; a multiplexer drains that source into the output
/// endpoint, buffering without bound so neither side ever blocks the other.
///
/// A result source backs exactly one pipeline: it is closed when the
/// pipeline's dispatcher stops.
///
/// ```ignore
/// let queue = Arc::new(ResultQueue::new());
/// let parser = Arc::new(MyParser::new(Arc::clone(&queue)));
/// let (input, mut output, handle) = QueueExecutor::new(parser, queue).start();
/// input.send(item).await?;
/// drop(input);
/// while let Some(result) = output.recv().await { /* ... */ }
/// let faults = handle.wait().await?;
/// ```
pub struct QueueExecutor<P: RuleParser, T: Send + 'static> {
    parser: Arc<P>,
    results: Arc<dyn ResultSource<T>>,
    config: ExecutorConfig,
    high_water_mark: Option<usize>,
    metrics: Option<Arc<PipelineMetrics>>,
    report_interval: Option<Duration>,
}

impl<P: RuleParser, T: Send + 'static> QueueExecutor<P, T> {
    pub fn new<S>(parser: Arc<P>, results: Arc<S>) -> Self
    where
        S: ResultSource<T> + 'static,
    {
        Self {
            parser,
            results,
            config: ExecutorConfig::default(),
            high_water_mark: None,
            metrics: None,
            report_interval: None,
        }
    }

    /// Build from a full [`QueueConfig`]. Metrics are collected (and reported
    /// periodically) only when `metrics.enabled` is set.
    pub fn from_config<S>(parser: Arc<P>, results: Arc<S>, config: &QueueConfig) -> Self
    where
        S: ResultSource<T> + 'static,
    {
        let mut executor = Self::new(parser, results)
            .with_config(&config.executor)
            .with_backlog(&config.backlog);
        if config.metrics.enabled {
            executor = executor.with_metrics(Arc::new(PipelineMetrics::new()));
            executor.report_interval = Some(config.metrics.report_interval.into());
        }
        executor
    }

    pub fn with_config(mut self, config: &ExecutorConfig) -> Self {
        self.config = config.clone();
        self
    }

    pub fn with_backlog(mut self, backlog: &BacklogConfig) -> Self {
        self.high_water_mark = backlog.high_water_mark;
        self
    }

    /// Collect counters into `metrics`. The same instance may be shared by
    /// several pipelines: counters and the latency histogram aggregate, while
    /// the backlog gauge is last-writer-wins and the backlog peak is the
    /// highest seen by any of them.
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn rule_parser(&self) -> &Arc<P> {
        &self.parser
    }

    pub fn metrics(&self) -> Option<&Arc<PipelineMetrics>> {
        self.metrics.as_ref()
    }

    /// Start the pipeline between `input` and `output` and return at once.
    ///
    /// The output endpoint closes after the input endpoint has closed, every
    /// evaluation has finished and every buffered result has been delivered.
    /// Must be called inside a tokio runtime.
    pub fn execute(&self, input: mpsc::Receiver<P::Item>, output: mpsc::Sender<T>) -> PipelineHandle {
        let cancel = CancellationToken::new();
        let reporter_cancel = CancellationToken::new();
        let (faults, fault_rx) = FaultReporter::channel();

        // Start order: metrics → multiplexer → dispatcher; joined in reverse.
        let mut groups: Vec<TaskGroup> = Vec::with_capacity(3);

        if let (Some(metrics), Some(interval)) = (&self.metrics, self.report_interval) {
            let mut group = TaskGroup::new("metrics");
            let metrics = Arc::clone(metrics);
            let stop = reporter_cancel.clone();
            group.push(tokio::spawn(async move {
                run_metrics_reporter(metrics, interval, stop).await;
                Ok(())
            }));
            groups.push(group);
        }

        let multiplexer = Multiplexer::new(
            Arc::clone(&self.results),
            output,
            self.high_water_mark,
            faults.clone(),
            self.metrics.clone(),
            cancel.clone(),
        );
        let stop_reporter = reporter_cancel.clone();
        let mut group = TaskGroup::new("multiplexer");
        group.push(tokio::spawn(async move {
            let res = multiplexer.run().await;
            // Nothing left to count once results stop flowing, even if the
            // handle was dropped without `wait`.
            stop_reporter.cancel();
            res
        }));
        groups.push(group);

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.parser),
            input,
            &self.config,
            faults,
            self.metrics.clone(),
            cancel.clone(),
        );
        let results = Arc::clone(&self.results);
        let mut group = TaskGroup::new("dispatcher");
        group.push(tokio::spawn(async move {
            let res = dispatcher.run().await;
            // Every evaluation has ended, so nothing more will be published.
            results.close();
            res
        }));
        groups.push(group);

        rq_info!(sys,
            pool = self.config.worker_pool_size,
            admission = %self.config.admission,
            metrics = self.metrics.is_some(),
            "queue pipeline started"
        );
        PipelineHandle::new(cancel, reporter_cancel, fault_rx, groups)
    }

    /// Create both endpoints with the configured capacities and start the
    /// pipeline between them.
    pub fn start(&self) -> (mpsc::Sender<P::Item>, mpsc::Receiver<T>, PipelineHandle) {
        let (input_tx, input_rx) = mpsc::channel(self.config.input_capacity.max(1));
        let (output_tx, output_rx) = mpsc::channel(self.config.output_capacity.max(1));
        let handle = self.execute(input_rx, output_tx);
        (input_tx, output_rx, handle)
    }
}
