use std::{path::Path, sync::LazyLock};

use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Which binary is logging. Selects the log file prefix and the default verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Daemon,
    Cli,
}

impl LogTarget {
    pub fn prefix(&self) -> &'static str {
        match self {
            LogTarget::Daemon => "daemon",
            LogTarget::Cli => "cli",
        }
    }

    /// The daemon runs unattended for the whole browser session, so its files stay at `info`.
    /// The cli is short lived and only records problems unless asked to.
    fn default_level(&self) -> LevelFilter {
        match self {
            LogTarget::Daemon => LevelFilter::INFO,
            LogTarget::Cli => LevelFilter::WARN,
        }
    }
}

/// Filter scoped to this crate. An explicit level wins over `RUST_LOG`, which wins over the
/// target's default.
fn filter_directive(
    target: LogTarget,
    log_level: Option<LevelFilter>,
    env: Option<String>,
) -> String {
    let level = log_level
        .map(|v| v.to_string())
        .or(env)
        .unwrap_or_else(|| target.default_level().to_string());
    format!("{}={level}", env!("CARGO_PKG_NAME").replace("-", "_"))
}

/// Logs into daily rolling files under `<application_data_path>/logs`. Console output is opt-in
/// and goes to stderr: the daemon's stdout carries protocol replies.
pub fn enable_logging(
    target: LogTarget,
    application_data_path: &Path,
    log_level: Option<LevelFilter>,
    show_std: bool,
) -> Result<()> {
    let appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .max_log_files(5)
        .filename_prefix(target.prefix())
        .build(application_data_path.join("logs"))?;

    let filter = EnvFilter::new(filter_directive(
        target,
        log_level,
        std::env::var("RUST_LOG").ok(),
    ));

    let file_layer = fmt::layer()
        .with_writer(appender)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE);
    let console_layer = show_std.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .pretty()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;
    Ok(())
}

pub static TEST_LOGGING: LazyLock<()> = LazyLock::new(|| {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .pretty()
        .init()
});
