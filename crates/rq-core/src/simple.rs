use std::sync::Arc;

use crate::error::CoreResult;
use crate::parser::RuleParser;

/// Synchronous executor: evaluates on the caller's task, one item at a time.
///
/// Results go wherever the parser publishes them, typically a
/// [`ResultCallback`](crate::result::ResultCallback).
pub struct SimpleExecutor<P> {
    parser: Arc<P>,
}

impl<P: RuleParser> SimpleExecutor<P> {
    pub fn new(parser: Arc<P>) -> Self {
        Self { parser }
    }

    pub fn rule_parser(&self) -> &Arc<P> {
        &self.parser
    }

    /// Evaluate a single work item and wait for it to finish.
    pub async fn execute(&self, item: P::Item) -> CoreResult<()> {
        self.parser.execute(item).await
    }

    /// Evaluate items in order, stopping at the first failure.
    pub async fn execute_all(&self, items: impl IntoIterator<Item = P::Item>) -> CoreResult<()> {
        for item in items {
            self.parser.execute(item).await?;
        }
        Ok(())
    }
}
