//! backup-sync - main entry point
//!
//! Runs one operation (backup, clean or list) over every configured target.

use anyhow::{Context, Result};
use backup_sync::config::DestinationKind;
use backup_sync::interrupt::{InterruptWatcher, SignalHandlers};
use backup_sync::remote::{rclone, RcloneStore, RemoteStore};
use backup_sync::{utils, Config, SyncEngine, SyncError};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Snapshot, archive and upload backups to rclone remotes", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "FILE")]
    config: PathBuf,

    #[command(flatten)]
    action: Action,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
struct Action {
    /// Take a new backup of every target
    #[arg(short, long)]
    backup: bool,

    /// Delete backups the retention policy no longer keeps
    #[arg(short, long)]
    clean: bool,

    /// Print the backups present at every destination
    #[arg(short = 'L', long)]
    list: bool,
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Backup,
    Clean,
    List,
}

impl Action {
    fn operation(&self) -> Operation {
        if self.backup {
            Operation::Backup
        } else if self.clean {
            Operation::Clean
        } else {
            Operation::List
        }
    }
}

fn perform(engine: &mut SyncEngine, operation: Operation) -> backup_sync::Result<()> {
    match operation {
        Operation::Backup => {
            engine.backup()?;
        }
        Operation::Clean => {
            engine.clean()?;
        }
        Operation::List => {
            let name = engine.target().name.clone();
            for backup in engine.get_backups(false) {
                println!("{}\t{}\t{}", name, backup.isoformat(), backup);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.settings.log_level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting backup-sync v{}", env!("CARGO_PKG_VERSION"));

    let Config { settings, backups } = config;
    if backups.is_empty() {
        tracing::info!("Nothing to do");
        return Ok(());
    }

    let store = RcloneStore::new(&settings.rclone_log_level)?;
    let remotes = store.remotes()?;
    for target in &backups {
        if target.destination.kind == DestinationKind::Rclone {
            rclone::validate_destination(&target.destination.path, &remotes)?;
        }
    }

    let settings = Arc::new(settings);
    let remote: Arc<dyn RemoteStore> = Arc::new(store);
    let engines = backups
        .into_iter()
        .map(|target| SyncEngine::new(target, settings.clone(), remote.clone()))
        .collect::<backup_sync::Result<Vec<_>>>()?;

    // Handlers are registered before the first target starts.
    let handlers = SignalHandlers::install().context("Failed to install signal handlers")?;
    let watcher = Arc::new(InterruptWatcher::new());
    let signal_watcher = watcher.clone();
    tokio::spawn(async move { signal_watcher.wait_for_signal(handlers).await });

    let operation = args.action.operation();
    for engine in engines {
        if watcher.is_interrupted() {
            break;
        }

        let name = engine.target().name.clone();
        let mut interrupt_rx = watcher.subscribe();
        let mut handle = tokio::task::spawn_blocking(move || {
            let mut engine = engine;
            let outcome = perform(&mut engine, operation);
            (engine, outcome)
        });

        let joined = tokio::select! {
            joined = &mut handle => joined,
            _ = interrupt_rx.recv() => {
                tracing::warn!("Interrupted, waiting for {} to stop", name);
                handle.await
            }
        };
        let (mut engine, outcome) = joined.context("Worker task panicked")?;

        let interrupted = watcher.is_interrupted();
        if outcome.is_err() || interrupted {
            let undo = tokio::task::spawn_blocking(move || engine.undo())
                .await
                .context("Worker task panicked")?;
            if let Err(e) = undo {
                tracing::error!("CRITICAL: could not remove the partial backup of {}: {}", name, e);
            }
        }

        if let Err(e) = outcome {
            return Err(e).with_context(|| format!("{:?} of {} failed", operation, name));
        }
        if interrupted {
            return Err(SyncError::Interrupted.into());
        }
    }

    if watcher.is_interrupted() {
        return Err(SyncError::Interrupted.into());
    }

    Ok(())
}
