//! facegridd: the facegrid daemon.
//!
//! Single binary that assembles every facegrid role:
//! - Object store (redb or memory)
//! - Request/response queues
//! - Local worker fleet
//! - Autoscaler
//! - Correlator + HTTP gateway
//!
//! # Usage
//!
//! ```text
//! facegridd standalone --config facegrid.toml --listen 0.0.0.0:8000
//! facegridd classify photos/alice.jpg --references references.json
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use facegridd::{Overrides, Standalone, load_classifier, load_config};
use tracing::info;

#[derive(Parser)]
#[command(name = "facegridd", about = "facegrid face-recognition daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run gateway, autoscaler and worker fleet in one process.
    Standalone {
        /// Path to facegrid.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Address the gateway listens on.
        #[arg(long)]
        listen: Option<String>,

        /// Worker instances provisioned in the local fleet.
        #[arg(long)]
        fleet_size: Option<u32>,

        /// Upper bound on concurrently active workers.
        #[arg(long)]
        max_instances: Option<u32>,

        /// Reference-set JSON file.
        #[arg(long)]
        references: Option<PathBuf>,
    },

    /// Classify a single image and print `<id>:<label>`.
    Classify {
        file: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        /// Reference-set JSON file.
        #[arg(long)]
        references: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,facegrid=debug,facegridd=debug"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Command::Standalone {
            config,
            listen,
            fleet_size,
            max_instances,
            references,
        } => {
            let overrides = Overrides {
                listen,
                fleet_size,
                max_instances,
                references,
            };
            let config = load_config(config.as_deref(), overrides)?;
            run_standalone(config).await
        }
        Command::Classify {
            file,
            config,
            references,
        } => {
            let overrides = Overrides {
                references,
                ..Overrides::default()
            };
            let config = load_config(config.as_deref(), overrides)?;
            classify_file(&config, file).await
        }
    }
}

async fn run_standalone(config: facegrid_core::FacegridConfig) -> anyhow::Result<()> {
    info!("facegrid daemon starting in standalone mode");

    let classifier = load_classifier(&config)?;
    let listen = config.gateway.listen.clone();
    let standalone = Standalone::new(config, classifier)?;

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("bind {listen}"))?;

    standalone
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await
}

async fn classify_file(config: &facegrid_core::FacegridConfig, file: PathBuf) -> anyhow::Result<()> {
    let classifier = load_classifier(config)?;
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", file.display()))?
        .to_string();
    let input = tokio::fs::read(&file)
        .await
        .with_context(|| format!("read {}", file.display()))?;

    let classification = tokio::task::spawn_blocking(move || classifier.classify(&input)).await??;
    info!(distance = classification.distance, "nearest reference");
    println!("{}:{}", facegrid_core::correlation_id(&name), classification.label);
    Ok(())
}
