use async_trait::async_trait;

use crate::error::CoreResult;
use crate::outcome::Outcome;

use super::ResultSink;

/// Result that hands every produced value straight to a callback.
///
/// Used by simple-mode execution where the caller consumes results inline.
/// Empty outcomes never reach the callback.
pub struct ResultCallback<T> {
    callback: Box<dyn Fn(T) + Send + Sync>,
}

impl<T> ResultCallback<T> {
    pub fn new(callback: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> ResultSink<T> for ResultCallback<T> {
    async fn put(&self, outcome: Outcome<T>) -> CoreResult<()> {
        if let Some(v) = outcome.into_value() {
            (self.callback)(v);
        }
        Ok(())
    }
}
