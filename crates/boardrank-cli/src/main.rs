use std::path::PathBuf;

use anyhow::{Context, Result};
use boardrank_core::RankEngine;
use boardrank_storage::{load_snapshot_file, merge_snapshot_files};
use boardrank_sync::{ingest_fixture, RunConfig};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str =
    "warn,boardrank=info,boardrank_sync=info,boardrank_storage=info,boardrank_report=info";

#[derive(Debug, Parser)]
#[command(name = "boardrank")]
#[command(about = "Board writer activity ranking")]
struct Cli {
    /// YAML run configuration; `BOARDRANK_*` environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest a fixture board into the checkpoint file.
    Ingest {
        #[arg(long)]
        fixture: PathBuf,
        /// Continue from the existing checkpoint instead of starting over.
        #[arg(long)]
        resume: bool,
    },
    /// Merge snapshot or checkpoint files into one snapshot.
    Merge {
        #[arg(long)]
        out: PathBuf,
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Rank a snapshot or checkpoint file and print the report.
    Report {
        file: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

/// A valid `RUST_LOG` replaces the default filter entirely.
fn log_filter(rust_log: Option<String>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = RunConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest { fixture, resume } => {
            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received; stopping after the current document");
                    ctrl_c.cancel();
                }
            });

            let outcome = ingest_fixture(&config, &fixture, resume, cancel).await?;
            let summary = outcome.summary;
            println!(
                "ingest complete: run_id={} source={} stop={:?} processed={} writers={} checkpoint={}",
                summary.run_id,
                summary.source_id,
                summary.stop_reason,
                summary.processed_count,
                summary.writers,
                summary.checkpoint_path
            );
        }
        Commands::Merge { out, inputs } => {
            let merged = merge_snapshot_files(&inputs, &out, chrono::Utc::now()).await?;
            info!(inputs = merged.inputs_loaded, out = %out.display(), "snapshots merged");
            println!(
                "merge complete: inputs={} writers={} articles={} replies={} out={}",
                merged.inputs_loaded,
                merged.snapshot.writer_count(),
                merged.snapshot.total_articles(),
                merged.snapshot.total_replies(),
                out.display()
            );
        }
        Commands::Report { file, out_dir } => {
            let mut snapshot = load_snapshot_file(&file)
                .await
                .with_context(|| format!("loading {}", file.display()))?;
            snapshot.finalize(chrono::Utc::now());
            let leaderboard = RankEngine::new(config.weights).leaderboard(&mut snapshot);
            print!(
                "{}",
                boardrank_report::render_report(&snapshot, &leaderboard, config.weights)
            );
            if let Some(out_dir) = out_dir {
                let bundle = boardrank_report::write_report_bundle(
                    &out_dir,
                    &snapshot,
                    &leaderboard,
                    config.weights,
                )
                .await?;
                eprintln!("report bundle: manifest={}", bundle.manifest_path.display());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_overrides_default_targets() {
        let filter = log_filter(Some("boardrank_sync=debug".to_string())).to_string();
        assert!(filter.contains("boardrank_sync=debug"), "{filter}");
        assert!(!filter.contains("boardrank_sync=info"), "{filter}");
    }

    #[test]
    fn default_filter_applies_without_rust_log() {
        let filter = log_filter(None).to_string();
        assert!(filter.contains("boardrank_sync=info"), "{filter}");
    }
}
