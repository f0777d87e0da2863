mod task_group;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeResult;
use crate::fault::PipelineFault;

pub(crate) use task_group::TaskGroup;

// ---------------------------------------------------------------------------
// PipelineHandle: control and observation of one queue-mode pipeline
// ---------------------------------------------------------------------------

/// Returned by [`QueueExecutor::execute`](crate::QueueExecutor::execute).
///
/// Dropping the handle does not stop the pipeline; the tasks keep running
/// until the input endpoint is closed and the backlog is drained. Call
/// [`shutdown`](Self::shutdown) to stop early and [`wait`](Self::wait) to
/// learn when everything has finished.
pub struct PipelineHandle {
    cancel: CancellationToken,
    /// Stops the periodic metrics reporter. The multiplexer task cancels it
    /// too when it finishes.
    reporter_cancel: CancellationToken,
    faults: mpsc::UnboundedReceiver<PipelineFault>,
    groups: Vec<TaskGroup>,
}

impl PipelineHandle {
    pub(crate) fn new(
        cancel: CancellationToken,
        reporter_cancel: CancellationToken,
        faults: mpsc::UnboundedReceiver<PipelineFault>,
        groups: Vec<TaskGroup>,
    ) -> Self {
        Self {
            cancel,
            reporter_cancel,
            faults,
            groups,
        }
    }

    /// Stop reading input and cancel in-flight evaluations.
    ///
    /// Results already published are still delivered before the output
    /// endpoint closes.
    pub fn shutdown(&self) {
        rq_info!(sys, "initiating pipeline shutdown");
        self.cancel.cancel();
    }

    /// Clone of the pipeline cancellation token, e.g. for signal handling.
    /// The token is also cancelled by the pipeline itself on a terminal fault.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next reported fault. Resolves to `None` once every pipeline task has
    /// finished and all faults have been read.
    pub async fn next_fault(&mut self) -> Option<PipelineFault> {
        self.faults.recv().await
    }

    pub fn try_next_fault(&mut self) -> Option<PipelineFault> {
        self.faults.try_recv().ok()
    }

    /// Wait for every pipeline task to finish.
    ///
    /// Groups are joined in LIFO order: dispatcher → multiplexer → metrics.
    /// Every group is joined even after a failure; the first failure is
    /// returned. On success the faults nobody has read yet are returned.
    pub async fn wait(mut self) -> RuntimeResult<Vec<PipelineFault>> {
        let mut first_err = None;
        while let Some(group) = self.groups.pop() {
            let name = group.name;
            rq_debug!(sys, task_group = name, "waiting for task group to finish");
            match group.wait().await {
                Ok(()) => rq_debug!(sys, task_group = name, "task group finished"),
                Err(e) => {
                    rq_warn!(sys, task_group = name, error = %e, "task group failed");
                    first_err.get_or_insert(e);
                }
            }

            if name == "multiplexer" {
                // Nothing left to count once results stop flowing.
                self.reporter_cancel.cancel();
            }
        }
        self.reporter_cancel.cancel();

        if let Some(e) = first_err {
            return Err(e);
        }
        let mut unread = Vec::new();
        while let Ok(fault) = self.faults.try_recv() {
            unread.push(fault);
        }
        rq_info!(sys, unread_faults = unread.len(), "pipeline stopped");
        Ok(unread)
    }
}
