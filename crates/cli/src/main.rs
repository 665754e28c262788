// Rework CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json output formats for scripting.
// Design Decision: Settings come from REWORK_* variables (and .env), with
// flags taking precedence.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use rework::{Runtime, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rework")]
#[command(about = "Rework CLI - Enqueue jobs and inspect workers, counters and failures")]
#[command(version)]
pub struct Cli {
    /// Store address (overrides REWORK_URI)
    #[arg(long, global = true)]
    pub uri: Option<String>,

    /// Key namespace (overrides REWORK_NAMESPACE)
    #[arg(long, global = true)]
    pub namespace: Option<String>,

    /// Connection pool ceiling (overrides REWORK_CONNECTIONS)
    #[arg(long, global = true)]
    pub connections: Option<usize>,

    /// Output format
    #[arg(long, short, global = true, default_value = "text", value_parser = ["text", "json"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Push a job onto a queue
    Enqueue {
        /// Queue name
        queue: String,

        /// Job class
        class: String,

        /// Job arguments; each is parsed as JSON, falling back to a string
        args: Vec<String>,

        /// Skip the push when an identical job is already waiting
        #[arg(long)]
        dedupe: bool,
    },

    /// Show processed and failed counters
    Stats {
        /// Also show the length of this queue (repeatable)
        #[arg(long)]
        queue: Vec<String>,
    },

    /// List registered workers and what they are running
    Workers,

    /// List failure records, oldest first
    Failures {
        /// Index of the first record
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Maximum number of records
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Print the effective worker configuration
    Config,
}

impl Cli {
    /// Environment configuration with command-line overrides applied
    fn worker_config(&self) -> anyhow::Result<WorkerConfig> {
        Ok(self.apply_overrides(WorkerConfig::from_env()?))
    }

    fn apply_overrides(&self, mut config: WorkerConfig) -> WorkerConfig {
        if let Some(uri) = &self.uri {
            config = config.with_uri(uri.clone());
        }
        if let Some(namespace) = &self.namespace {
            config = config.with_namespace(namespace.clone());
        }
        if let Some(connections) = self.connections {
            config = config.with_connections(connections);
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rework=info,rework_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let output_format = output::OutputFormat::from_str(&cli.output);
    let config = cli.worker_config()?;

    // Connections are opened lazily, so `config` works without a reachable store
    let runtime = Runtime::connect(config)?;

    match cli.command {
        Commands::Enqueue {
            queue,
            class,
            args,
            dedupe,
        } => {
            commands::enqueue::run(&runtime, output_format, cli.quiet, &queue, &class, &args, dedupe)
                .await
        }
        Commands::Stats { queue } => commands::stats::run(&runtime, output_format, &queue).await,
        Commands::Workers => commands::workers::run(&runtime, output_format).await,
        Commands::Failures { offset, limit } => {
            commands::failures::run(&runtime, output_format, offset, limit).await
        }
        Commands::Config => commands::config::run(runtime.config(), output_format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_enqueue() {
        let cli = Cli::parse_from([
            "rework", "enqueue", "mail", "SendEmail", "42", "bob", "--dedupe", "-o", "json",
        ]);
        assert_eq!(cli.output, "json");
        match cli.command {
            Commands::Enqueue {
                queue,
                class,
                args,
                dedupe,
            } => {
                assert_eq!(queue, "mail");
                assert_eq!(class, "SendEmail");
                assert_eq!(args, vec!["42", "bob"]);
                assert!(dedupe);
            }
            _ => panic!("expected enqueue"),
        }
    }

    #[test]
    fn test_flags_override_environment() {
        let options: HashMap<String, String> = [
            ("uri", "redis://env:6379/"),
            ("namespace", "env:"),
            ("connections", "3"),
            ("concurrency", "4"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let from_env = WorkerConfig::from_options(&options).unwrap();

        let cli = Cli::parse_from([
            "rework",
            "--uri",
            "redis://cache:6380/",
            "--namespace",
            "jobs:",
            "--connections",
            "7",
            "config",
        ]);
        let config = cli.apply_overrides(from_env.clone());
        assert_eq!(config.uri, "redis://cache:6380/");
        assert_eq!(config.namespace, "jobs:");
        assert_eq!(config.connections, 7);
        assert_eq!(config.concurrency, 4);

        // Without flags the environment values stand
        let bare = Cli::parse_from(["rework", "config"]);
        assert_eq!(bare.apply_overrides(from_env.clone()), from_env);
    }

    #[test]
    fn test_rejects_unknown_output_format() {
        assert!(Cli::try_parse_from(["rework", "-o", "yaml", "workers"]).is_err());
    }
}
