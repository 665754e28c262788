// Failure log command

use crate::output::{print_table_header, print_table_row, OutputFormat};
use anyhow::Result;
use rework::{RedisConnector, Runtime};

pub async fn run(
    runtime: &Runtime<RedisConnector>,
    output: OutputFormat,
    offset: usize,
    limit: usize,
) -> Result<()> {
    let stats = runtime.stats();
    let failures = stats.failures(offset, limit).await?;

    if output.is_text() {
        if failures.is_empty() {
            println!("No failures found");
            return Ok(());
        }

        print_table_header(&[
            ("FAILED AT", 25),
            ("QUEUE", 15),
            ("CLASS", 20),
            ("EXCEPTION", 9),
            ("ERROR", 40),
        ]);

        for failure in &failures {
            print_table_row(&[
                (&failure.failed_at.to_rfc3339(), 25),
                (&failure.queue, 15),
                (&failure.payload.class, 20),
                (&failure.exception, 9),
                (&failure.error, 40),
            ]);
        }
    } else {
        let total = stats.failure_count().await?;
        output.print_value(&serde_json::json!({
            "data": failures,
            "offset": offset,
            "total": total,
        }))?;
    }

    Ok(())
}
