//! Facefold daemon: keeps faces and suggestions up to date in the background.
//!
//! - Periodic sync of the library roots and enabled watch folders
//! - Immediate folder scans when a watch folder changes on disk
//! - Face extraction for new and changed photos, then suggestion passes
//!
//! The CLI and the daemon share the SQLite database.
//!
//! ## Usage
//!
//! ```bash
//! facefold-daemon              # Run in foreground
//! facefold-daemon --once       # Sync once, drain the queue and exit
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use facefold::config::Config;
use facefold::db::{watch_folders, Database};
use facefold::faces;
use facefold::logging::{self, LogTarget};
use facefold::pipeline::{Orchestrator, PipelineContext};
use facefold::scanner::FsMediaSource;
use facefold::tasks::{WorkEvent, WorkTarget};
use facefold::watch::Observer;

#[derive(Parser)]
#[command(name = "facefold-daemon", version, about = "Background face matching for facefold")]
struct Args {
    /// Sync once, wait for all work to finish and exit
    #[arg(long, short = '1')]
    once: bool,

    /// Path to config file (overrides FACEFOLD_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(LogTarget::Service(Config::log_dir()))?;

    info!("Facefold daemon starting...");

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db = Arc::new(
        Database::open(&config.database.path)
            .with_context(|| format!("Failed to open database {:?}", config.database.path))?,
    );
    db.initialize()?;
    info!(path = ?config.database.path, "Database opened");

    let extractor = Arc::new(faces::load_extractor(&config.faces)?);
    let source = Arc::new(FsMediaSource::new(&config.library));
    let ctx = PipelineContext::new(Arc::clone(&db), source, Arc::clone(&extractor), &config);
    let orchestrator = Orchestrator::start(ctx, &config.pipeline);

    tokio::spawn(report_failures(orchestrator.subscribe()));

    if args.once {
        info!("Running in single-shot mode");
        orchestrator.enqueue(WorkTarget::GlobalSync);
        orchestrator.wait_idle().await;
    } else {
        run_until_stopped(&orchestrator, &db, &config).await?;
    }

    orchestrator.shutdown().await;
    extractor.close();
    info!("Facefold daemon stopped");
    Ok(())
}

async fn run_until_stopped(orchestrator: &Orchestrator, db: &Database, config: &Config) -> Result<()> {
    let mut observer = Observer::new();
    refresh_observation(&mut observer, orchestrator, db);

    let interval = config.pipeline.sync_interval();
    info!(?interval, "Running in daemon mode");
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                orchestrator.enqueue(WorkTarget::GlobalSync);
                refresh_observation(&mut observer, orchestrator, db);
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for shutdown signal")?;
                info!("Shutdown requested");
                break;
            }
        }
    }

    observer.stop();
    Ok(())
}

/// Follow changes to the enabled watch folders. Failure only pauses observation.
fn refresh_observation(observer: &mut Observer, orchestrator: &Orchestrator, db: &Database) {
    let folders = match db.read(|c| watch_folders::list(c, true)) {
        Ok(folders) => folders,
        Err(e) => {
            warn!(error = %e, "Cannot list watch folders");
            return;
        }
    };
    if observer.refresh(&folders, orchestrator.queue()) {
        info!(folders = folders.len(), "Watch folder observation started");
    }
}

/// Surface failed units in the log without stopping the pipeline.
async fn report_failures(mut events: tokio::sync::broadcast::Receiver<WorkEvent>) {
    loop {
        match events.recv().await {
            Ok(WorkEvent::Failed { id, target, error }) => {
                error!(%id, %target, error = %error, "Work unit failed permanently");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed pipeline events"),
            Err(RecvError::Closed) => break,
        }
    }
}
