use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::config::ConfigOverrides;

#[derive(Parser)]
#[command(name = "greentab-daemon", version, about = "Tracks browser dwell time per domain")]
pub struct DaemonArgs {
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Mirrors logs into stderr. Stdout is reserved for replies.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    #[command(flatten)]
    pub config: ConfigOverrides,
}
