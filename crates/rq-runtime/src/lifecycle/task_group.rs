use tokio::task::JoinHandle;

use orion_error::StructError;

use crate::error::{RuntimeReason, RuntimeResult};

// ---------------------------------------------------------------------------
// TaskGroup: named collection of async tasks for ordered shutdown
// ---------------------------------------------------------------------------

/// A named group of pipeline tasks that are joined together.
///
/// Groups are assembled in *start order* and joined in *reverse order*
/// (LIFO) by [`PipelineHandle::wait`](super::PipelineHandle::wait):
///
///   start:  metrics → multiplexer → dispatcher
///   join:   dispatcher → multiplexer → metrics
///
/// The dispatcher closes the result source when it stops, which is what lets
/// the multiplexer drain and finish.
pub(crate) struct TaskGroup {
    pub(super) name: &'static str,
    handles: Vec<JoinHandle<anyhow::Result<()>>>,
}

impl TaskGroup {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            handles: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, handle: JoinHandle<anyhow::Result<()>>) {
        self.handles.push(handle);
    }

    /// Join every task in the group and return the first error.
    ///
    /// A task that panicked or was aborted maps to `Shutdown`; a task that
    /// returned an error (a terminal pipeline fault) maps to `Pipeline`.
    pub(super) async fn wait(self) -> RuntimeResult<()> {
        let mut first: Option<crate::error::RuntimeError> = None;
        for handle in self.handles {
            let joined = handle
                .await
                .map_err(|e| {
                    StructError::from(RuntimeReason::Shutdown)
                        .with_detail(format!("{} task join error: {e}", self.name))
                })
                .and_then(|res| {
                    res.map_err(|e| {
                        StructError::from(RuntimeReason::Pipeline)
                            .with_detail(format!("{} task failed: {e}", self.name))
                    })
                });
            if let Err(e) = joined {
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_group_joins_ok() {
        TaskGroup::new("empty").wait().await.unwrap();
    }

    #[tokio::test]
    async fn task_error_fails_the_group() {
        let mut group = TaskGroup::new("multiplexer");
        group.push(tokio::spawn(async { Ok(()) }));
        group.push(tokio::spawn(async { anyhow::bail!("output endpoint abandoned") }));

        assert!(group.wait().await.is_err());
    }

    #[tokio::test]
    async fn panicking_task_fails_the_group() {
        let mut group = TaskGroup::new("dispatcher");
        group.push(tokio::spawn(async { panic!("boom") }));

        assert!(group.wait().await.is_err());
    }
}
