pub mod output;
pub mod report;

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use report::{process_report_command, process_today_command, ReportCommand};
use tracing::level_filters::LevelFilter;

use crate::{
    config::{Config, ConfigOverrides},
    daemon::{
        open_store, start_daemon,
        storage::aggregator::LedgerAggregator,
        sync::{
            auth::{load_session, AUTH_RETRY},
            SyncRelay,
        },
    },
    utils::{
        clock::DefaultClock,
        dir::create_application_default_path,
        logging::{enable_logging, LogTarget},
    },
};

#[derive(Parser, Debug)]
#[command(name = "GreenTab", version, long_about = None)]
#[command(about = "Browser dwell time per domain and its estimated environmental impact", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(
        about = "Run the tracker in the current console, reading browser messages from stdin"
    )]
    Serve {
        #[command(flatten)]
        config: ConfigOverrides,
    },
    #[command(about = "Display time and impact per domain for today")]
    Today {},
    #[command(about = "Display daily totals and top domains over a range of days")]
    Report {
        #[command(flatten)]
        command: ReportCommand,
    },
    #[command(about = "Push the local ledger to the remote store once")]
    Sync {
        #[command(flatten)]
        config: ConfigOverrides,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = args.dir.map_or_else(create_application_default_path, Ok)?;
    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(LogTarget::Cli, &app_dir, logging_level, args.log)?;
    let config = Config::load(&app_dir)?;

    match args.commands {
        Commands::Serve { config: overrides } => {
            start_daemon(app_dir, config.apply(&overrides)).await
        }
        Commands::Today {} => {
            let ledger = LedgerAggregator::new(open_store(&app_dir)?).ledger().await?;
            process_today_command(&ledger, &config.impact);
            Ok(())
        }
        Commands::Report { command } => {
            let ledger = LedgerAggregator::new(open_store(&app_dir)?).ledger().await?;
            process_report_command(command, &ledger, &config.impact)
        }
        Commands::Sync { config: overrides } => {
            let config = config.apply(&overrides);
            let remote = config
                .remote_store()?
                .ok_or_else(|| anyhow!("No remote configured, set remote.base_url or --remote-url"))?;
            let aggregator = Arc::new(LedgerAggregator::new(open_store(&app_dir)?));
            let session = load_session(aggregator.store(), &DefaultClock, &AUTH_RETRY)
                .await?
                .ok_or_else(|| anyhow!("Not signed in, nothing to sync"))?;

            let relay = SyncRelay::new(
                remote,
                aggregator,
                config.impact,
                config.sync_interval(),
                Box::new(DefaultClock),
            );
            let report = relay.sync_once(&session).await?;
            println!("Synced {} records, {} failed", report.succeeded, report.failed);
            Ok(())
        }
    }
}
