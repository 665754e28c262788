// Counter summary command

use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};
use anyhow::Result;
use rework::{RedisConnector, Runtime};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct QueueLength {
    queue: String,
    length: usize,
}

pub async fn run(
    runtime: &Runtime<RedisConnector>,
    output: OutputFormat,
    queues: &[String],
) -> Result<()> {
    let stats = runtime.stats();
    let summary = stats.summary().await?;

    let mut lengths = Vec::with_capacity(queues.len());
    for queue in queues {
        lengths.push(QueueLength {
            queue: queue.clone(),
            length: stats.queue_length(queue).await?,
        });
    }

    if output.is_text() {
        print_field("Namespace", &runtime.config().namespace);
        print_field("Processed", &summary.processed.to_string());
        print_field("Failed", &summary.failed.to_string());
        print_field("Workers", &summary.workers.to_string());
        print_field("Failure log", &summary.failures_recorded.to_string());

        if !lengths.is_empty() {
            println!();
            print_table_header(&[("QUEUE", 30), ("LENGTH", 10)]);
            for entry in &lengths {
                print_table_row(&[(&entry.queue, 30), (&entry.length.to_string(), 10)]);
            }
        }
    } else {
        output.print_value(&serde_json::json!({ "summary": summary, "queues": lengths }))?;
    }

    Ok(())
}
