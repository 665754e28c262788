//! Minimal worker
//!
//! Run with: cargo run -p rework --example hello_worker
//!
//! Uses the in-memory store, enqueues a few jobs and processes them until the
//! queues are empty. Set `REWORK_URI` and use `Runtime::connect` to work
//! against Redis instead.

use std::time::Duration;

use rework::prelude::*;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rework=debug,hello_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::default()
        .with_queues(Queues::parse("critical=3,default=1")?)
        .with_interval(Duration::from_millis(500))
        .with_concurrency(4)
        .with_exit_on_complete(true);
    let pool = ResourcePool::new(MemoryStore::new(), PoolConfig::new(config.connections));
    let mut runtime = Runtime::new(config, pool);

    runtime.register("Greet", |queue, args| async move {
        let name = args
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| JobError::new("expected a name"))?;
        tracing::info!(%queue, "Hello, {name}!");
        Ok(())
    });

    for name in ["Ada", "Grace", "Linus"] {
        runtime.enqueue("default", "Greet", vec![json!(name)], true).await?;
    }
    runtime.enqueue("critical", "Greet", vec![json!("Ken")], false).await?;
    runtime.enqueue("critical", "Greet", vec![json!(42)], false).await?;

    let report = runtime.work_until_complete().await?;
    let stats = runtime.stats();
    println!(
        "processed {} failed {} (store counters: {} / {})",
        report.processed(),
        report.failed(),
        stats.processed().await?,
        stats.failed().await?
    );
    for failure in stats.failures(0, 10).await? {
        println!("failure in {}: {}", failure.queue, failure.error);
    }
    Ok(())
}
