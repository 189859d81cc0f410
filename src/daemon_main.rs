use anyhow::Result;
use clap::Parser;
use greentab::{
    config::Config,
    daemon::{args::DaemonArgs, start_daemon},
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, LogTarget},
        runtime::single_thread_runtime,
    },
};
use tracing::error;

fn main() -> Result<()> {
    run(DaemonArgs::parse())
}

fn run(args: DaemonArgs) -> Result<()> {
    let app_dir = args.dir.map_or_else(create_application_default_path, Ok)?;
    enable_logging(LogTarget::Daemon, &app_dir, args.log, args.log_console)?;
    let config = Config::load(&app_dir)
        .inspect_err(|e| error!("Failed to load config {e:?}"))?
        .apply(&args.config);
    single_thread_runtime()?.block_on(async move { start_daemon(app_dir, config).await })?;
    Ok(())
}
