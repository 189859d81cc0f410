use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use events::json_lines::{JsonLinesSource, JsonLinesWriter};
use host::TrackerHost;
use storage::{aggregator::LedgerAggregator, kv::FileStore};
use sync::SyncRelay;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracking::tracker::DwellTracker;

use crate::{
    config::Config,
    utils::{clock::DefaultClock, dir::ensure_dir},
};

pub mod args;
pub mod events;
pub mod host;
pub mod shutdown;
pub mod storage;
pub mod sync;
pub mod tracking;

/// Directory inside the application directory holding the key value documents.
pub const STORAGE_DIR: &str = "storage";

pub fn open_store(dir: &Path) -> Result<FileStore> {
    Ok(FileStore::new(ensure_dir(dir.join(STORAGE_DIR))?)?)
}

/// Represents the starting point for the daemon. Browser messages are read from stdin and
/// query replies written to stdout.
pub async fn start_daemon(dir: PathBuf, config: Config) -> Result<()> {
    let aggregator = Arc::new(LedgerAggregator::new(open_store(&dir)?));

    let relay = config.remote_store()?.map(|remote| {
        Arc::new(SyncRelay::new(
            remote,
            aggregator.clone(),
            config.impact,
            config.sync_interval(),
            Box::new(DefaultClock),
        ))
    });

    let tracker = DwellTracker::new(
        aggregator.clone(),
        Box::new(DefaultClock),
        config.flush_interval(),
    );

    let shutdown_token = CancellationToken::new();
    let host = TrackerHost::new(
        JsonLinesSource::new(BufReader::new(tokio::io::stdin())),
        JsonLinesWriter::new(tokio::io::stdout()),
        tracker,
        aggregator,
        relay,
        Box::new(DefaultClock),
        shutdown_token.clone(),
    );

    info!("Daemon started in {dir:?}");
    let (_, host_result) = tokio::join!(shutdown::detect_shutdown(shutdown_token), host.run());

    if let Err(host_result) = &host_result {
        error!("Tracker got an error {:?}", host_result);
    }
    host_result
}
