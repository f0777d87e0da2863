mod backlog;


use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rq_core::{CoreResult, Outcome, ResultSource};

use crate::fault::{FaultReporter, PipelineFault};
use crate::metrics::PipelineMetrics;

use backlog::Backlog;

// ---------------------------------------------------------------------------
// Phase: multiplexer state machine
// ---------------------------------------------------------------------------

/// ```text
///   Priming ──value──▶ Multiplexing ──backlog empty──▶ Priming
///      │                    │
///      └──source closed──▶ Closing ◀──source closed──┘
///                           │
///                     backlog drained, output dropped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Backlog empty: wait on the source only.
    Priming,
    /// Backlog non-empty: race accepting a new result against delivering the
    /// oldest one.
    Multiplexing,
    /// Source exhausted: flush the backlog, then close the output.
    Closing,
}

/// What a single pull from the source produced.
enum Pulled {
    Value,
    Empty,
    SourceClosed,
}

/// Which side of the multiplexing race completed.
enum Step<T> {
    Fetched(CoreResult<Option<Outcome<T>>>),
    Delivered,
    Idle,
    Abandoned,
}

// ---------------------------------------------------------------------------
// Multiplexer
// ---------------------------------------------------------------------------

/// Fan-in adapter between a single-item [`ResultSource`] and a paced output
/// endpoint.
///
/// The source and the consumer never wait on each other: results pulled
/// while the consumer is busy queue up in an unbounded [`Backlog`], and
/// delivery order is the source's production order. `Outcome::Empty` is
/// dropped on arrival.
///
/// The output endpoint is closed (its sender dropped) exactly once, when
/// `run` returns.
pub(crate) struct Multiplexer<T: Send + 'static> {
    results: Arc<dyn ResultSource<T>>,
    output: mpsc::Sender<T>,
    backlog: Backlog<T>,
    faults: FaultReporter,
    metrics: Option<Arc<PipelineMetrics>>,
    /// Pipeline-wide token, cancelled here on a terminal fault.
    cancel: CancellationToken,
    delivered: u64,
}

impl<T: Send + 'static> Multiplexer<T> {
    pub(crate) fn new(
        results: Arc<dyn ResultSource<T>>,
        output: mpsc::Sender<T>,
        high_water_mark: Option<usize>,
        faults: FaultReporter,
        metrics: Option<Arc<PipelineMetrics>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            results,
            output,
            backlog: Backlog::new(high_water_mark, metrics.clone()),
            faults,
            metrics,
            cancel,
            delivered: 0,
        }
    }

    /// Run until the source is exhausted and every buffered result has been
    /// delivered, or until a terminal fault.
    ///
    /// On a terminal fault the fault is published, the pipeline is cancelled
    /// and the source is closed so producers stop feeding a dead pipeline.
    #[tracing::instrument(name = "multiplexer", skip_all)]
    pub(crate) async fn run(mut self) -> anyhow::Result<()> {
        match self.pump().await {
            Ok(()) => {
                rq_debug!(pipe, delivered = self.delivered, "output endpoint closed");
                Ok(())
            }
            Err(fault) => {
                rq_error!(pipe, error = %fault, delivered = self.delivered, "multiplexer stopped");
                self.faults.report(fault.clone());
                self.cancel.cancel();
                self.results.close();
                Err(fault.into())
            }
        }
    }

    async fn pump(&mut self) -> Result<(), PipelineFault> {
        let mut phase = Phase::Priming;
        loop {
            phase = match phase {
                Phase::Priming => self.prime().await?,
                Phase::Multiplexing => self.multiplex().await?,
                Phase::Closing => return self.drain().await,
            };
        }
    }

    async fn prime(&mut self) -> Result<Phase, PipelineFault> {
        loop {
            let fetched = self.results.next_result().await;
            match self.accept(fetched)? {
                Pulled::Value => return Ok(Phase::Multiplexing),
                Pulled::Empty => continue,
                Pulled::SourceClosed => return Ok(Phase::Closing),
            }
        }
    }

    async fn multiplex(&mut self) -> Result<Phase, PipelineFault> {
        while !self.backlog.is_empty() {
            // The reserve permit borrows `output`; finish with it inside the
            // arm so `&mut self` is free again below.
            let backlog = &mut self.backlog;
            let output = &self.output;
            let results = &self.results;
            // Unbiased: when both sides are ready either may win.
            let step = tokio::select! {
                fetched = results.next_result() => Step::Fetched(fetched),
                permit = output.reserve() => match permit {
                    Ok(permit) => match backlog.pop_front() {
                        Some(value) => {
                            permit.send(value);
                            Step::Delivered
                        }
                        None => Step::Idle,
                    },
                    Err(_) => Step::Abandoned,
                },
            };
            match step {
                Step::Fetched(fetched) => {
                    if let Pulled::SourceClosed = self.accept(fetched)? {
                        return Ok(Phase::Closing);
                    }
                }
                Step::Delivered => self.on_delivered(),
                Step::Idle => {}
                Step::Abandoned => {
                    return Err(PipelineFault::OutputAbandoned {
                        pending: self.backlog.len(),
                    });
                }
            }
        }
        Ok(Phase::Priming)
    }

    async fn drain(&mut self) -> Result<(), PipelineFault> {
        if !self.backlog.is_empty() {
            rq_debug!(pipe, backlog = self.backlog.len(), "draining backlog after source closed");
        }
        while !self.backlog.is_empty() {
            let Ok(permit) = self.output.reserve().await else {
                return Err(PipelineFault::OutputAbandoned {
                    pending: self.backlog.len(),
                });
            };
            if let Some(value) = self.backlog.pop_front() {
                permit.send(value);
                self.on_delivered();
            }
        }
        Ok(())
    }

    fn accept(&mut self, fetched: CoreResult<Option<Outcome<T>>>) -> Result<Pulled, PipelineFault> {
        match fetched {
            Ok(Some(Outcome::Value(value))) => {
                self.backlog.push(value);
                if let Some(metrics) = &self.metrics {
                    metrics.inc_result_accepted();
                }
                rq_trace!(pipe, backlog = self.backlog.len(), "result accepted");
                Ok(Pulled::Value)
            }
            Ok(Some(Outcome::Empty)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_empty_filtered();
                }
                Ok(Pulled::Empty)
            }
            Ok(None) => {
                rq_debug!(pipe, backlog = self.backlog.len(), "result source closed");
                Ok(Pulled::SourceClosed)
            }
            Err(e) => Err(PipelineFault::ProtocolViolation {
                detail: e.to_string(),
            }),
        }
    }

    fn on_delivered(&mut self) {
        self.delivered += 1;
        if let Some(metrics) = &self.metrics {
            metrics.inc_result_delivered();
        }
        rq_trace!(pipe, backlog = self.backlog.len(), "result delivered");
    }
}
