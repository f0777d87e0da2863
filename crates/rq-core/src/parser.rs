use async_trait::async_trait;

use crate::error::CoreResult;

/// Trigger side of a rule evaluator.
///
/// `execute` evaluates one work item against the rule set and publishes zero
/// or more outcomes to whatever [`ResultSink`](crate::result::ResultSink) the
/// parser was built with. Rule storage, matching and priority handling are
/// entirely the parser's business.
///
/// Queue-mode execution calls `execute` from many tasks at once, so any
/// internal state must be synchronised by the implementation.
#[async_trait]
pub trait RuleParser: Send + Sync + 'static {
    type Item: Send + 'static;

    async fn execute(&self, item: Self::Item) -> CoreResult<()>;
}
