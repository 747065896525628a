use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info};
use tree_backup::backup::orchestrator::{BackupRunResult, Orchestrator, RunStatus};
use tree_backup::backup::result_error::error::Error;
use tree_backup::backup::result_error::result::Result;
use tree_backup::backup::result_error::AddMsg;
use tree_backup::backup::schedule::{LoopScheduler, Scheduler};
use tree_backup::backup::state::ConfigStore;

/// Back up a directory tree, once or on the configured schedule
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file (.json, .yml or .yaml)
    #[arg(short, long)]
    config: PathBuf,

    /// Keep running and back up on the configured schedule
    #[arg(short, long)]
    daemon: bool,
}

fn report(result: &BackupRunResult) {
    match result.status() {
        RunStatus::Success => info!(
            "Backup finished: {} files, {} bytes, {} old archives removed",
            result.files_written(),
            result.bytes_written(),
            result.deleted().len()
        ),
        RunStatus::NoChanges => info!("Backup skipped, nothing changed"),
        RunStatus::Failed => {
            if let Some(e) = result.error() {
                error!("{e}");
            }
        }
    }
}

fn load(args: &Args) -> Result<(ConfigStore, Orchestrator)> {
    let store = ConfigStore::new(&args.config)?;
    let config = store
        .load()
        .add_msg(format!("Load config failed: {:?}", &args.config))?;
    let orchestrator = Orchestrator::new(config, Box::new(store.clone()))?;
    Ok((store, orchestrator))
}

fn run_daemon(mut orchestrator: Orchestrator) -> Result<()> {
    let schedule = orchestrator
        .config()
        .schedule()
        .clone()
        .filter(|s| s.enabled())
        .ok_or_else(|| Error::configuration("Daemon mode needs an enabled Schedule"))?;
    let trigger = schedule.trigger(&Local::now())?;
    LoopScheduler.register_recurring_trigger(trigger, &mut || report(&orchestrator.run()))
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let (store, orchestrator) = match load(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    };
    info!("Loaded config {:?}", store.path());

    if args.daemon {
        if let Err(e) = run_daemon(orchestrator) {
            error!("{e}");
            exit(1);
        }
        return;
    }

    let mut orchestrator = orchestrator;
    let result = orchestrator.run();
    report(&result);
    exit(result.exit_code());
}
