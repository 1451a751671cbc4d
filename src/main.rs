//! Command-line interface for pipesync
//!
//! # Usage Examples
//!
//! ```bash
//! # Start a pipeline defined in pipelines.toml
//! pipesync start orders --pipelines-file pipelines.toml
//!
//! # Re-start after fixing a connector problem (idempotent; updates the
//! # existing connectors)
//! pipesync start orders --pipelines-file pipelines.toml
//!
//! # Inspect generated configurations without touching anything
//! pipesync start orders --pipelines-file pipelines.toml --dry-run
//!
//! # Stop streaming; the captured offset survives for the next start
//! pipesync stop orders --pipelines-file pipelines.toml
//!
//! # Aggregated status including live connector state
//! pipesync status orders --pipelines-file pipelines.toml
//! ```
//!
//! The connector runtime URL comes from `--connect-url` or the
//! `CONNECT_URL` environment variable.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use connect_client::HttpConnectClient;
use offset_types::FilesystemStore;
use pipesync::fullload::DriverBackend;
use pipesync::{Orchestrator, OrchestratorOptions, PipelineStore};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pipesync")]
#[command(about = "Replication pipelines: full load plus CDC connector hand-off")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct CommonOpts {
    /// TOML file declaring connections and pipelines
    #[arg(long, default_value = "pipelines.toml", env = "PIPESYNC_PIPELINES")]
    pipelines_file: String,

    /// Connector runtime base URL
    #[arg(long, default_value = "http://localhost:8083", env = "CONNECT_URL")]
    connect_url: String,

    /// Directory for durable offset files
    #[arg(long, default_value = ".pipesync-offsets", env = "PIPESYNC_OFFSET_DIR")]
    offset_dir: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start (or re-start) a pipeline
    Start {
        /// Pipeline name from the pipelines file
        pipeline: String,

        #[command(flatten)]
        common: CommonOpts,

        /// Batch size for the full-load transfer
        #[arg(long, default_value = "1000")]
        batch_size: u32,

        /// Build and log connector configs without submitting anything
        #[arg(long)]
        dry_run: bool,

        /// Maximum status polls before giving up on RUNNING
        #[arg(long, default_value = "30")]
        poll_attempts: u32,

        /// Seconds between status polls
        #[arg(long, default_value = "2")]
        poll_interval_secs: u64,
    },

    /// Stop a pipeline's connectors
    Stop {
        pipeline: String,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Show aggregated pipeline and connector status
    Status {
        pipeline: String,

        #[command(flatten)]
        common: CommonOpts,
    },
}

async fn build_orchestrator(
    common: &CommonOpts,
    options: OrchestratorOptions,
) -> anyhow::Result<Orchestrator<HttpConnectClient>> {
    let store = PipelineStore::new().with_offset_store(FilesystemStore::new(&common.offset_dir));
    store
        .load_file(&common.pipelines_file)
        .await
        .with_context(|| format!("failed to load pipelines file {}", common.pipelines_file))?;

    let runtime = HttpConnectClient::new(common.connect_url.clone())
        .context("failed to build connector runtime client")?;

    Ok(Orchestrator::new(
        Arc::new(store),
        runtime,
        Arc::new(DriverBackend),
        options,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipesync=info,connect_client=info,offset_types=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            pipeline,
            common,
            batch_size,
            dry_run,
            poll_attempts,
            poll_interval_secs,
        } => {
            let options = OrchestratorOptions {
                batch_size,
                dry_run,
                poll_attempts,
                poll_interval: Duration::from_secs(poll_interval_secs),
                ..OrchestratorOptions::default()
            };
            let orchestrator = build_orchestrator(&common, options).await?;

            match orchestrator.start(&pipeline).await {
                Ok(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    Ok(())
                }
                Err(e) => {
                    // Phase-tagged failure so the operator knows whether a
                    // plain re-start can help
                    eprintln!(
                        "start failed (phase: {}): {}",
                        e.phase.map(|p| p.as_str()).unwrap_or("validation"),
                        e.source
                    );
                    Err(e.into())
                }
            }
        }

        Commands::Stop { pipeline, common } => {
            let orchestrator =
                build_orchestrator(&common, OrchestratorOptions::default()).await?;
            orchestrator.stop(&pipeline).await?;
            println!("pipeline '{pipeline}' stopped");
            Ok(())
        }

        Commands::Status { pipeline, common } => {
            let orchestrator =
                build_orchestrator(&common, OrchestratorOptions::default()).await?;
            let report = orchestrator.status(&pipeline).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
