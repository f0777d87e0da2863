//! `init_tracing` installs the global subscriber, so this file holds a
//! single test.

use std::sync::Arc;

use async_trait::async_trait;

use rq_config::QueueConfig;
use rq_core::{CoreResult, ResultQueue, ResultSink, RuleParser};
use rq_runtime::QueueExecutor;
use rq_runtime::tracing_init::init_tracing;

struct Echo {
    out: Arc<ResultQueue<u32>>,
}

#[async_trait]
impl RuleParser for Echo {
    type Item = u32;

    async fn execute(&self, item: u32) -> CoreResult<()> {
        self.out.put_value(item).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn json_log_file_receives_domain_tagged_events() {
    let base = tempfile::tempdir().unwrap();
    let config: QueueConfig = r#"
[logging]
level = "info"
format = "json"
file = "logs/rq.log"
"#
    .parse()
    .unwrap();

    let guard = init_tracing(&config.logging, base.path())
        .unwrap()
        .expect("file logging returns a guard");
    // A second global subscriber is refused.
    assert!(init_tracing(&config.logging, base.path()).is_err());

    let queue = Arc::new(ResultQueue::new());
    let parser = Arc::new(Echo {
        out: Arc::clone(&queue),
    });
    let (input, mut output, handle) = QueueExecutor::from_config(parser, queue, &config).start();
    input.send(1).await.unwrap();
    drop(input);
    assert_eq!(output.recv().await, Some(1));
    assert_eq!(output.recv().await, None);
    handle.wait().await.unwrap();
    drop(guard);

    let log = std::fs::read_to_string(base.path().join("logs/rq.log")).unwrap();
    if std::env::var("RUST_LOG").is_err() {
        assert!(log.contains("queue pipeline started"), "{log}");
        assert!(log.contains(r#""domain":"sys""#), "{log}");
    }
}
