//! Updater - command-line host for the update engine.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedReceiver;
use update_engine::transfer::progress::{format_bytes, format_speed, TransferPhase};
use update_engine::{
    utils, Config, HttpTransferWorker, MirrorRegistry, UpdateEvent, UpdateOrchestrator,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "updater.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the installed build
    Info,
    /// Check the mirrors for a newer build
    Check,
    /// Check, then download and stage a newer build
    Update,
}

type Orchestrator = UpdateOrchestrator<HttpTransferWorker>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting updater v{} (install dir: {})",
        env!("CARGO_PKG_VERSION"),
        config.install.dir.display()
    );

    let worker = HttpTransferWorker::new(&config.transfer)?;
    let registry = MirrorRegistry::new(config.mirrors());
    let (orchestrator, mut events) =
        UpdateOrchestrator::new(config.install.clone(), registry, worker);

    match args.command {
        Command::Info => {
            let local = orchestrator.read_local_build_info()?;
            println!("Installed build: {}", local.version());
            println!("Files: {} ({})", local.len(), format_bytes(local.total_size()));
            if let Some(published_at) = local.published_at() {
                println!("Published: {}", published_at.to_rfc3339());
            }
        }
        Command::Check => {
            orchestrator.read_local_build_info()?;
            let outcome = run_check(&orchestrator, &mut events, args.json).await?;
            if let UpdateEvent::CheckFailed { reason } = outcome {
                bail!("update check failed: {}", reason);
            }
        }
        Command::Update => {
            orchestrator.read_local_build_info()?;
            match run_check(&orchestrator, &mut events, args.json).await? {
                UpdateEvent::Outdated { .. } => {}
                UpdateEvent::CheckFailed { reason } => bail!("update check failed: {}", reason),
                _ => return Ok(()),
            }

            orchestrator.perform_update()?;
            match wait_for_terminal(&orchestrator, &mut events, args.json, true).await? {
                UpdateEvent::DownloadCompleted => {
                    // The applier needs our file locks released
                    tracing::info!("Exiting so the applier can finish the update");
                    std::process::exit(0);
                }
                UpdateEvent::Failed { reason } => bail!("update failed: {}", reason),
                _ => {}
            }
        }
    }

    Ok(())
}

async fn run_check(
    orchestrator: &Orchestrator,
    events: &mut UnboundedReceiver<UpdateEvent>,
    json: bool,
) -> Result<UpdateEvent> {
    if orchestrator.check_for_updates().is_none() {
        bail!("another update operation is already running");
    }
    wait_for_terminal(orchestrator, events, json, false).await
}

/// Print events until one ends the running operation
async fn wait_for_terminal(
    orchestrator: &Orchestrator,
    events: &mut UnboundedReceiver<UpdateEvent>,
    json: bool,
    cancellable: bool,
) -> Result<UpdateEvent> {
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    bail!("update engine stopped without a result");
                };
                report(&event, json)?;
                if event.is_terminal() {
                    return Ok(event);
                }
            }
            _ = tokio::signal::ctrl_c(), if cancellable && !cancel_requested => {
                tracing::info!("Received SIGINT (Ctrl+C), cancelling download...");
                cancel_requested = orchestrator.cancel_update();
            }
        }
    }
}

fn report(event: &UpdateEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        UpdateEvent::CheckFailed { reason } => println!("Update check failed: {}", reason),
        UpdateEvent::UpToDate => println!("Installation is up to date"),
        UpdateEvent::Outdated {
            version,
            estimated_bytes,
        } => println!(
            "Version {} is available (about {} to download)",
            version,
            format_bytes(*estimated_bytes)
        ),
        UpdateEvent::Progress(progress) => match progress.phase {
            TransferPhase::Preparing => println!("{}...", progress.current_item),
            TransferPhase::Downloading => println!(
                "[{:5.1}%] {} ({:.0}%) {}",
                progress.session_percent,
                progress.current_item,
                progress.item_percent,
                format_speed(progress.bytes_per_second)
            ),
        },
        UpdateEvent::Cancelled => println!("Update cancelled"),
        UpdateEvent::Failed { reason } => println!("Update failed: {}", reason),
        UpdateEvent::DownloadCompleted => println!("Update downloaded, restarting to apply"),
    }
    Ok(())
}
