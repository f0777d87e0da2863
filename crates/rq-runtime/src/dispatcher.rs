use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use rq_config::{AdmissionPolicy, ExecutorConfig};
use rq_core::RuleParser;

use crate::fault::{FaultReporter, PipelineFault};
use crate::metrics::{EvalStatus, PipelineMetrics};

/// Why the intake loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// Every input sender was dropped.
    InputClosed,
    /// The pipeline token was cancelled.
    Cancelled,
}

// ---------------------------------------------------------------------------
// Dispatcher: fan-out of work items to evaluation tasks
// ---------------------------------------------------------------------------

/// Reads work items from the input endpoint and runs one evaluation task per
/// item, bounded by a worker pool of `worker_pool_size` permits.
///
/// The dispatcher never waits for an evaluation to finish before reading the
/// next item; only pool saturation under [`AdmissionPolicy::Block`] slows
/// intake down.
pub(crate) struct Dispatcher<P: RuleParser> {
    parser: Arc<P>,
    input: mpsc::Receiver<P::Item>,
    pool: Arc<Semaphore>,
    pool_size: usize,
    admission: AdmissionPolicy,
    eval_timeout: Option<Duration>,
    shutdown_timeout: Duration,
    faults: FaultReporter,
    metrics: Option<Arc<PipelineMetrics>>,
    cancel: CancellationToken,
    /// Child of `cancel`; every evaluation task listens on it.
    eval_cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl<P: RuleParser> Dispatcher<P> {
    pub(crate) fn new(
        parser: Arc<P>,
        input: mpsc::Receiver<P::Item>,
        config: &ExecutorConfig,
        faults: FaultReporter,
        metrics: Option<Arc<PipelineMetrics>>,
        cancel: CancellationToken,
    ) -> Self {
        let pool_size = config.worker_pool_size.max(1);
        Self {
            parser,
            input,
            pool: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            admission: config.admission,
            eval_timeout: config.eval_timeout.map(Into::into),
            shutdown_timeout: config.shutdown_timeout.into(),
            faults,
            metrics,
            eval_cancel: cancel.child_token(),
            cancel,
            tasks: JoinSet::new(),
        }
    }

    /// Run the intake loop, then wind down the in-flight evaluations.
    ///
    /// Returns once every evaluation task has been joined (or aborted after
    /// the shutdown grace period).
    #[tracing::instrument(name = "dispatcher", skip_all)]
    pub(crate) async fn run(mut self) -> anyhow::Result<()> {
        rq_debug!(pipe,
            pool = self.pool_size,
            admission = %self.admission,
            "dispatcher started"
        );
        let stop = self.intake().await?;
        self.finish(stop).await;
        Ok(())
    }

    async fn intake(&mut self) -> anyhow::Result<Stop> {
        loop {
            while let Some(joined) = self.tasks.try_join_next() {
                self.on_joined(joined);
            }

            let step = match self.admission {
                AdmissionPolicy::Block => self.admit_blocking().await?,
                AdmissionPolicy::Reject => self.admit_or_reject().await,
            };
            if let Some(stop) = step {
                return Ok(stop);
            }
        }
    }

    /// Wait for a free worker, then read one item.
    async fn admit_blocking(&mut self) -> anyhow::Result<Option<Stop>> {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(Some(Stop::Cancelled)),
            permit = Arc::clone(&self.pool).acquire_owned() => permit
                .map_err(|_| anyhow::anyhow!("worker pool semaphore closed"))?,
        };
        let item = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(Some(Stop::Cancelled)),
            item = self.input.recv() => item,
        };
        match item {
            Some(item) => {
                self.on_received();
                self.spawn_evaluation(item, permit);
                Ok(None)
            }
            None => Ok(Some(Stop::InputClosed)),
        }
    }

    /// Read one item, then run it if a worker is free or drop it otherwise.
    async fn admit_or_reject(&mut self) -> Option<Stop> {
        let item = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Some(Stop::Cancelled),
            item = self.input.recv() => item,
        };
        let Some(item) = item else {
            return Some(Stop::InputClosed);
        };
        self.on_received();
        match Arc::clone(&self.pool).try_acquire_owned() {
            Ok(permit) => self.spawn_evaluation(item, permit),
            Err(_) => {
                drop(item);
                if let Some(metrics) = &self.metrics {
                    metrics.inc_item_rejected();
                }
                rq_warn!(pipe, pool = self.pool_size, "worker pool saturated; work item rejected");
                self.faults.report(PipelineFault::AdmissionRejected {
                    pool_size: self.pool_size,
                });
            }
        }
        None
    }

    fn on_received(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_item_received();
        }
    }

    fn spawn_evaluation(&mut self, item: P::Item, permit: OwnedSemaphorePermit) {
        let task = EvalTask {
            parser: Arc::clone(&self.parser),
            eval_timeout: self.eval_timeout,
            cancel: self.eval_cancel.clone(),
            faults: self.faults.clone(),
            metrics: self.metrics.clone(),
            _permit: permit,
        };
        self.tasks.spawn(task.run(item));
        rq_trace!(pipe, in_flight = self.tasks.len(), "evaluation spawned");
    }

    async fn finish(mut self, stop: Stop) {
        match stop {
            Stop::InputClosed => {
                rq_debug!(pipe,
                    in_flight = self.tasks.len(),
                    "input closed; joining in-flight evaluations"
                );
                while let Some(joined) = self.tasks.join_next().await {
                    self.on_joined(joined);
                }
            }
            Stop::Cancelled => {
                self.input.close();
                let mut dropped = 0usize;
                while self.input.try_recv().is_ok() {
                    dropped += 1;
                }
                rq_info!(pipe,
                    in_flight = self.tasks.len(),
                    dropped,
                    "dispatcher cancelled; stopping in-flight evaluations"
                );
                self.eval_cancel.cancel();

                let grace = self.shutdown_timeout;
                let joined = tokio::time::timeout(grace, async {
                    while let Some(joined) = self.tasks.join_next().await {
                        self.on_joined(joined);
                    }
                })
                .await;
                if joined.is_err() {
                    rq_warn!(pipe,
                        stragglers = self.tasks.len(),
                        grace = ?grace,
                        "evaluations ignored cancellation; aborting"
                    );
                    self.tasks.abort_all();
                    while let Some(joined) = self.tasks.join_next().await {
                        self.on_joined(joined);
                    }
                }
            }
        }
        rq_debug!(pipe, "dispatcher stopped");
    }

    fn on_joined(&self, joined: Result<(), JoinError>) {
        let Err(e) = joined else {
            return;
        };
        if e.is_panic() {
            rq_error!(pipe, error = %e, "evaluation task panicked");
            self.faults.report(PipelineFault::Evaluation {
                detail: format!("evaluation task panicked: {e}"),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// EvalTask: one evaluation of one work item
// ---------------------------------------------------------------------------

struct EvalTask<P> {
    parser: Arc<P>,
    eval_timeout: Option<Duration>,
    cancel: CancellationToken,
    faults: FaultReporter,
    metrics: Option<Arc<PipelineMetrics>>,
    /// Released when the task ends, freeing a pool slot.
    _permit: OwnedSemaphorePermit,
}

impl<P: RuleParser> EvalTask<P> {
    async fn run(self, item: P::Item) {
        let mut guard = InFlight::start(self.metrics.clone());
        let evaluation = async {
            match self.eval_timeout {
                Some(limit) => tokio::time::timeout(limit, self.parser.execute(item))
                    .await
                    .ok(),
                None => Some(self.parser.execute(item).await),
            }
        };

        guard.status = tokio::select! {
            _ = self.cancel.cancelled() => EvalStatus::Cancelled,
            outcome = evaluation => match outcome {
                Some(Ok(())) => EvalStatus::Ok,
                Some(Err(e)) => {
                    rq_warn!(pipe, error = %e, "evaluation failed");
                    self.faults.report(PipelineFault::Evaluation {
                        detail: e.to_string(),
                    });
                    EvalStatus::Failed
                }
                None => {
                    let timeout = self.eval_timeout.unwrap_or_default();
                    rq_warn!(pipe, timeout = ?timeout, "evaluation timed out");
                    self.faults
                        .report(PipelineFault::EvaluationTimeout { timeout });
                    EvalStatus::TimedOut
                }
            },
        };
    }
}

/// Keeps the in-flight gauge honest even when a task is aborted or panics.
struct InFlight {
    metrics: Option<Arc<PipelineMetrics>>,
    started: Instant,
    status: EvalStatus,
}

impl InFlight {
    fn start(metrics: Option<Arc<PipelineMetrics>>) -> Self {
        if let Some(m) = &metrics {
            m.evaluation_started();
        }
        Self {
            metrics,
            started: Instant::now(),
            status: EvalStatus::Cancelled,
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(m) = &self.metrics {
            // Aborted tasks keep `Cancelled`; a panic counts as a failure.
            let status = if std::thread::panicking() {
                EvalStatus::Failed
            } else {
                self.status
            };
            m.evaluation_finished(status, self.started.elapsed());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
