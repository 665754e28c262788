// Worker listing command

use crate::output::{print_table_header, print_table_row, OutputFormat};
use anyhow::Result;
use rework::{RedisConnector, Runtime};

pub async fn run(runtime: &Runtime<RedisConnector>, output: OutputFormat) -> Result<()> {
    let workers = runtime.stats().workers().await?;

    if output.is_text() {
        if workers.is_empty() {
            println!("No workers registered");
            return Ok(());
        }

        print_table_header(&[("WORKER", 40), ("QUEUE", 15), ("CLASS", 25), ("SINCE", 25)]);

        for worker in &workers {
            match &worker.status {
                Some(status) => print_table_row(&[
                    (&worker.id, 40),
                    (&status.queue, 15),
                    (&status.payload.class, 25),
                    (&status.run_at.to_rfc3339(), 25),
                ]),
                None => print_table_row(&[(&worker.id, 40), ("-", 15), ("idle", 25), ("-", 25)]),
            }
        }
    } else {
        output.print_value(&serde_json::json!({ "data": workers, "total": workers.len() }))?;
    }

    Ok(())
}
