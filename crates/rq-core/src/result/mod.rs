mod callback;
mod queue;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::outcome::Outcome;

pub use callback::ResultCallback;
pub use queue::ResultQueue;

// ---------------------------------------------------------------------------
// ResultSink: write side used by rule evaluation
// ---------------------------------------------------------------------------

/// Destination that rule evaluation publishes its outcomes to.
///
/// Implementations must accept concurrent `put` calls from many evaluation
/// tasks.
#[async_trait]
pub trait ResultSink<T: Send + 'static>: Send + Sync {
    async fn put(&self, outcome: Outcome<T>) -> CoreResult<()>;

    async fn put_value(&self, value: T) -> CoreResult<()> {
        self.put(Outcome::Value(value)).await
    }

    async fn put_empty(&self) -> CoreResult<()> {
        self.put(Outcome::Empty).await
    }
}

// ---------------------------------------------------------------------------
// ResultSource: single-item read side consumed by the fan-in multiplexer
// ---------------------------------------------------------------------------

/// Single-item-at-a-time retrieval of evaluation outcomes.
///
/// # Contract
///
/// * `next_result` resolves to `Ok(Some(_))` when an outcome is available and
///   to `Ok(None)` once the source is closed and fully drained; after the
///   first `None` every later call also yields `None`.
/// * `Err(_)` means the source produced something it cannot represent as an
///   outcome. Consumers treat it as fatal.
/// * `next_result` must be cancel safe: dropping the future before it
///   completes must not lose an outcome. It is raced against output delivery
///   inside `tokio::select!`.
/// * `next_result` may run concurrently with any number of producers.
#[async_trait]
pub trait ResultSource<T: Send + 'static>: Send + Sync {
    async fn next_result(&self) -> CoreResult<Option<Outcome<T>>>;

    /// Stop admitting new outcomes. Outcomes already queued still drain.
    /// Must be idempotent.
    fn close(&self);
}
