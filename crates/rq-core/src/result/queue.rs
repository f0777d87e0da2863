use std::sync::Mutex;

use async_trait::async_trait;
use orion_error::StructError;
use tokio::sync::mpsc;

use crate::error::{CoreError, CoreReason, CoreResult};
use crate::outcome::Outcome;

use super::{ResultSink, ResultSource};

/// Channel-backed result: evaluation tasks `put` outcomes, one consumer
/// pulls them with [`ResultSource::next_result`].
///
/// The queue is bounded. With the default capacity of one it behaves as a
/// strictly single-item source: a producer waits until the previous outcome
/// has been taken.
pub struct ResultQueue<T> {
    /// `None` once closed. Producers clone the sender per `put`, so puts that
    /// started before `close` still land in the queue.
    tx: Mutex<Option<mpsc::Sender<Outcome<T>>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Outcome<T>>>,
}

impl<T: Send + 'static> ResultQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(1)
    }

    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().expect("result queue lock poisoned").is_none()
    }

    fn sender(&self) -> Option<mpsc::Sender<Outcome<T>>> {
        self.tx
            .lock()
            .expect("result queue lock poisoned")
            .as_ref()
            .cloned()
    }
}

impl<T: Send + 'static> Default for ResultQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn closed_error() -> CoreError {
    StructError::from(CoreReason::ResultClosed)
        .with_detail("put on a closed result queue".to_string())
}

#[async_trait]
impl<T: Send + 'static> ResultSink<T> for ResultQueue<T> {
    async fn put(&self, outcome: Outcome<T>) -> CoreResult<()> {
        let tx = self.sender().ok_or_else(closed_error)?;
        tx.send(outcome).await.map_err(|_| closed_error())
    }
}

#[async_trait]
impl<T: Send + 'static> ResultSource<T> for ResultQueue<T> {
    async fn next_result(&self) -> CoreResult<Option<Outcome<T>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }

    fn close(&self) {
        if self
            .tx
            .lock()
            .expect("result queue lock poisoned")
            .take()
            .is_some()
        {
            log::debug!("result queue closed");
        }
    }
}
