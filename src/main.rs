use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

mod config;
mod error;
mod integrations;
mod models;
mod runtime;
mod sync;

use config::Config;
use error::SyncError;
use integrations::{google::GoogleTasks, notion::NotionTasks};
use sync::{SyncStateStore, Synchronizer};

/// Keeps a Notion task database and a Google Tasks list in sync.
#[derive(Parser, Debug)]
#[command(name = "tasklink", version, about)]
struct Cli {
    /// Google Tasks list to sync with (created if missing)
    #[arg(long)]
    task_list: Option<String>,

    /// Run a single pass and exit
    #[arg(long)]
    one_time: bool,

    /// Seconds between passes in continuous mode
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Path to config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Path to the sync state file
    #[arg(long, value_name = "PATH")]
    state_file: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn run(cli: Cli) -> Result<ExitCode, SyncError> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    apply_overrides(&mut config, &cli);
    config.validate()?;

    let state_path = config::sync_state_path(&config);
    log::debug!("sync state at {}", state_path.display());

    let notion = NotionTasks::connect(&config.notion)?;
    let google = GoogleTasks::connect(&config.google)?;
    let mut synchronizer = Synchronizer::new(notion, google, SyncStateStore::new(state_path));

    if cli.one_time {
        return Ok(match runtime::run_once(&mut synchronizer) {
            Ok(_) => ExitCode::SUCCESS,
            Err(_) => ExitCode::FAILURE,
        });
    }

    let interval = Duration::from_secs(config.sync.interval_seconds.max(1));
    log::info!(
        "syncing every {}s with Google Tasks list \"{}\"",
        interval.as_secs(),
        config.google.task_list
    );
    runtime::run_loop(&mut synchronizer, interval, || true);
    Ok(ExitCode::SUCCESS)
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(task_list) = &cli.task_list {
        config.google.task_list = task_list.clone();
    }
    if let Some(interval) = cli.interval {
        config.sync.interval_seconds = interval;
    }
    if let Some(path) = &cli.state_file {
        config.sync.state_path = path.clone();
    }
}
