use std::time::Duration;

use tokio::sync::mpsc;

/// A failure observed inside a running pipeline.
///
/// Every fault is published on the pipeline's fault channel (see
/// [`PipelineHandle::next_fault`](crate::PipelineHandle::next_fault)).
/// Terminal faults also stop the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineFault {
    /// `RuleParser::execute` returned an error for one work item.
    #[error("evaluation failed: {detail}")]
    Evaluation { detail: String },
    /// One evaluation exceeded `executor.eval_timeout` and was dropped.
    #[error("evaluation timed out after {timeout:?}")]
    EvaluationTimeout { timeout: Duration },
    /// The worker pool was saturated under the `reject` admission policy.
    #[error("work item rejected: all {pool_size} workers busy")]
    AdmissionRejected { pool_size: usize },
    /// The result source returned something other than an outcome.
    #[error("result source protocol violation: {detail}")]
    ProtocolViolation { detail: String },
    /// The output receiver was dropped while results were still owed to it.
    #[error("output endpoint abandoned with {pending} undelivered results")]
    OutputAbandoned { pending: usize },
}

impl PipelineFault {
    /// Terminal faults shut the whole pipeline down.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ProtocolViolation { .. } | Self::OutputAbandoned { .. }
        )
    }
}

/// Cloneable sender half of the fault channel.
///
/// Reporting never blocks; faults are silently dropped once the
/// [`PipelineHandle`](crate::PipelineHandle) is gone.
#[derive(Clone)]
pub(crate) struct FaultReporter {
    tx: mpsc::UnboundedSender<PipelineFault>,
}

impl FaultReporter {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineFault>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn report(&self, fault: PipelineFault) {
        let _ = self.tx.send(fault);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(PipelineFault::OutputAbandoned { pending: 3 }.is_terminal());
        assert!(PipelineFault::ProtocolViolation { detail: "x".into() }.is_terminal());
        assert!(!PipelineFault::Evaluation { detail: "x".into() }.is_terminal());
        assert!(!PipelineFault::AdmissionRejected { pool_size: 2 }.is_terminal());
        assert!(
            !PipelineFault::EvaluationTimeout {
                timeout: Duration::from_secs(1)
            }
            .is_terminal()
        );
    }

    #[test]
    fn reporting_after_receiver_drop_is_silent() {
        let (reporter, rx) = FaultReporter::channel();
        reporter.report(PipelineFault::AdmissionRejected { pool_size: 1 });
        drop(rx);
        reporter.report(PipelineFault::AdmissionRejected { pool_size: 1 });
    }

    #[test]
    fn display_mentions_pending_count() {
        let fault = PipelineFault::OutputAbandoned { pending: 7 };
        assert_eq!(
            fault.to_string(),
            "output endpoint abandoned with 7 undelivered results"
        );
    }
}
