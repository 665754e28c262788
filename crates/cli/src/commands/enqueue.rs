// Job enqueue command

use crate::output::{print_field, OutputFormat};
use anyhow::Result;
use rework::{EnqueueOutcome, RedisConnector, Runtime};
use serde_json::{json, Value};

pub async fn run(
    runtime: &Runtime<RedisConnector>,
    output: OutputFormat,
    quiet: bool,
    queue: &str,
    class: &str,
    args: &[String],
    dedupe: bool,
) -> Result<()> {
    let args: Vec<Value> = args.iter().map(|raw| parse_arg(raw)).collect();
    tracing::debug!(queue, class, dedupe, args = args.len(), "Enqueueing");
    let outcome = runtime.enqueue(queue, class, args, dedupe).await?;

    if output.is_text() {
        match outcome {
            EnqueueOutcome::Enqueued { length } if quiet => println!("{}", length),
            EnqueueOutcome::Enqueued { length } => {
                println!("Enqueued {} on {}", class, queue);
                print_field("Queue length", &length.to_string());
            }
            EnqueueOutcome::Duplicate if quiet => {}
            EnqueueOutcome::Duplicate => {
                println!("Skipped {} on {}: identical job already waiting", class, queue);
            }
        }
    } else {
        let value = match outcome {
            EnqueueOutcome::Enqueued { length } => {
                json!({ "queue": queue, "class": class, "enqueued": true, "length": length })
            }
            EnqueueOutcome::Duplicate => {
                json!({ "queue": queue, "class": class, "enqueued": false })
            }
        };
        output.print_value(&value)?;
    }

    Ok(())
}

/// Arguments are JSON when they parse as JSON, plain strings otherwise
fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arg() {
        assert_eq!(parse_arg("42"), json!(42));
        assert_eq!(parse_arg("true"), json!(true));
        assert_eq!(parse_arg(r#"{"id":7}"#), json!({ "id": 7 }));
        assert_eq!(parse_arg(r#""quoted""#), json!("quoted"));
        assert_eq!(parse_arg("bob"), json!("bob"));
        assert_eq!(parse_arg(""), json!(""));
    }
}
