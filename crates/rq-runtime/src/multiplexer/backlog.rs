use std::collections::VecDeque;
use std::sync::Arc;

use crate::metrics::PipelineMetrics;

/// FIFO of results pulled from the source but not yet delivered.
///
/// Unbounded. The optional high-water mark only produces a warning; it is
/// re-armed once the backlog has shrunk to half the mark.
pub(super) struct Backlog<T> {
    items: VecDeque<T>,
    high_water_mark: Option<usize>,
    above_mark: bool,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl<T> Backlog<T> {
    pub(super) fn new(high_water_mark: Option<usize>, metrics: Option<Arc<PipelineMetrics>>) -> Self {
        Self {
            items: VecDeque::new(),
            high_water_mark,
            above_mark: false,
            metrics,
        }
    }

    pub(super) fn len(&self) -> usize {
        self.items.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(super) fn push(&mut self, value: T) {
        self.items.push_back(value);
        self.record_len();
        if let Some(mark) = self.high_water_mark
            && !self.above_mark
            && self.items.len() >= mark
        {
            self.above_mark = true;
            rq_warn!(res,
                backlog = self.items.len(),
                high_water_mark = mark,
                "result backlog reached high-water mark; consumer is falling behind"
            );
        }
    }

    pub(super) fn pop_front(&mut self) -> Option<T> {
        let value = self.items.pop_front()?;
        self.record_len();
        if let Some(mark) = self.high_water_mark
            && self.above_mark
            && self.items.len() <= mark / 2
        {
            self.above_mark = false;
            rq_debug!(res, backlog = self.items.len(), "result backlog back under high-water mark");
        }
        Some(value)
    }

    #[cfg(test)]
    pub(super) fn above_mark(&self) -> bool {
        self.above_mark
    }

    fn record_len(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_backlog(self.items.len());
        }
    }
}
