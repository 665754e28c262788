// Effective configuration command

use crate::output::{print_field, OutputFormat};
use anyhow::Result;
use rework::WorkerConfig;

pub fn run(config: &WorkerConfig, output: OutputFormat) -> Result<()> {
    if output.is_text() {
        println!("{}", config);
        println!();
        print_field("Queues", &config.queues.to_string());
        print_field("Interval", &format!("{:?}", config.interval));
        print_field("Concurrency", &config.concurrency.to_string());
        print_field("Connections", &config.connections.to_string());
        print_field("URI", &config.uri);
        print_field("Namespace", &config.namespace);
        print_field("Exit on empty", &config.exit_on_complete.to_string());
    } else {
        output.print_value(&serde_json::json!({
            "queues": config.queues.rotation(),
            "strict": config.queues.is_strict(),
            "interval_secs": config.interval.as_secs_f64(),
            "concurrency": config.concurrency,
            "connections": config.connections,
            "uri": config.uri,
            "namespace": config.namespace,
            "exit_on_complete": config.exit_on_complete,
        }))?;
    }

    Ok(())
}
