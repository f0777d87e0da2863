//! Shutdown and terminal-fault behaviour of a running pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use rq_config::{ExecutorConfig, HumanDuration};
use rq_core::{CoreResult, ResultQueue, ResultSink, RuleParser};
use rq_runtime::{PipelineFault, PipelineMetrics, QueueExecutor};

/// Echoes the item after sleeping `item` milliseconds.
struct Delayed {
    out: Arc<ResultQueue<u64>>,
}

#[async_trait]
impl RuleParser for Delayed {
    type Item = u64;

    async fn execute(&self, item: u64) -> CoreResult<()> {
        tokio::time::sleep(Duration::from_millis(item)).await;
        self.out.put_value(item).await
    }
}

fn executor(metrics: &Arc<PipelineMetrics>) -> QueueExecutor<Delayed, u64> {
    let queue = Arc::new(ResultQueue::with_capacity(4));
    let parser = Arc::new(Delayed {
        out: Arc::clone(&queue),
    });
    let config = ExecutorConfig {
        shutdown_timeout: HumanDuration::from(Duration::from_millis(200)),
        ..ExecutorConfig::default()
    };
    QueueExecutor::new(parser, queue)
        .with_config(&config)
        .with_metrics(Arc::clone(metrics))
}

async fn collect(output: &mut mpsc::Receiver<u64>) -> Vec<u64> {
    let mut got = Vec::new();
    while let Some(v) = output.recv().await {
        got.push(v);
    }
    got
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_cancels_in_flight_and_closes_output() {
    let metrics = Arc::new(PipelineMetrics::new());
    let (input, mut output, handle) = executor(&metrics).start();

    input.send(3_600_000).await.unwrap();
    input.send(1).await.unwrap();
    assert_eq!(output.recv().await, Some(1));

    handle.shutdown();
    let rest = tokio::time::timeout(Duration::from_secs(5), collect(&mut output))
        .await
        .expect("output did not close after shutdown");
    assert!(rest.is_empty());
    assert!(handle.wait().await.unwrap().is_empty());

    let snap = metrics.snapshot();
    assert_eq!(snap.evaluations_cancelled, 1);
    assert_eq!(snap.evaluations_in_flight, 0);
    // The dispatcher no longer reads input.
    assert!(input.send(5).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_token_stops_the_pipeline() {
    let metrics = Arc::new(PipelineMetrics::new());
    let (input, mut output, handle) = executor(&metrics).start();
    let token = handle.cancel_token();

    input.send(3_600_000).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    assert!(collect(&mut output).await.is_empty());
    handle.wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dropped_output_is_a_terminal_fault() {
    let metrics = Arc::new(PipelineMetrics::new());
    let (input, output, mut handle) = executor(&metrics).start();

    // Output capacity is one: the first result fills it, the rest back up.
    for _ in 0..4 {
        input.send(1).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(output);

    let fault = tokio::time::timeout(Duration::from_secs(5), handle.next_fault())
        .await
        .expect("no fault after output was dropped");
    match fault {
        Some(fault @ PipelineFault::OutputAbandoned { pending }) => {
            assert!(pending >= 1);
            assert!(fault.is_terminal());
        }
        other => panic!("expected OutputAbandoned, got {other:?}"),
    }
    assert!(handle.cancel_token().is_cancelled());
    assert!(handle.wait().await.is_err());
    assert!(input.send(1).await.is_err());
}
