//! Pushes the local ledger to a remote store. Every nonzero ledger entry becomes a
//! [record::SyncedRecord] that is upserted on its own; one failing record never aborts the
//! batch.

pub mod auth;
pub mod record;
pub mod remote;

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use auth::AuthSession;
use futures::{stream, StreamExt};
use record::{build_records, SyncedRecord};
use remote::{InsertOutcome, RemoteStore, UpdateOutcome};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::{
    daemon::storage::{
        aggregator::LedgerAggregator,
        kv::{set_typed, KeyValueStore},
    },
    impact::ImpactFactors,
    utils::clock::Clock,
};

/// Storage key of the time of the last sync that pushed at least one record.
pub const LAST_SYNC_KEY: &str = "lastSyncAt";

const UPSERT_CONCURRENCY: usize = 4;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Updated,
    Inserted,
}

/// Upsert emulated with update-if-exists, then insert-if-absent. An insert that conflicts
/// means someone created the row in between, so the update is retried exactly once.
pub async fn upsert(
    remote: &impl RemoteStore,
    session: &AuthSession,
    record: &SyncedRecord,
) -> Result<UpsertOutcome> {
    if remote.update(session, record).await? == UpdateOutcome::Updated {
        return Ok(UpsertOutcome::Updated);
    }
    match remote.insert(session, record).await? {
        InsertOutcome::Inserted => Ok(UpsertOutcome::Inserted),
        InsertOutcome::Conflict => match remote.update(session, record).await? {
            UpdateOutcome::Updated => Ok(UpsertOutcome::Updated),
            UpdateOutcome::Missing => bail!(
                "Record for {} on {} conflicted on insert but is missing on update",
                record.domain,
                record.date
            ),
        },
    }
}

pub struct SyncRelay<R, S> {
    remote: R,
    aggregator: Arc<LedgerAggregator<S>>,
    factors: ImpactFactors,
    interval: Duration,
    clock: Box<dyn Clock>,
}

impl<R: RemoteStore, S: KeyValueStore> SyncRelay<R, S> {
    pub fn new(
        remote: R,
        aggregator: Arc<LedgerAggregator<S>>,
        factors: ImpactFactors,
        interval: Duration,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            remote,
            aggregator,
            factors,
            interval,
            clock,
        }
    }

    /// Pushes the whole ledger once. Only a failure to read the ledger is an error, record
    /// failures are counted in the report.
    #[instrument(skip_all, fields(user = %session.user_id))]
    pub async fn sync_once(&self, session: &AuthSession) -> Result<SyncReport> {
        let ledger = self.aggregator.ledger().await?;
        let now = self.clock.time();
        let records = build_records(&ledger, &session.user_id, &self.factors, now);
        if records.is_empty() {
            debug!("Nothing to sync");
            return Ok(SyncReport::default());
        }

        let remote = &self.remote;
        let results = stream::iter(records)
            .map(|record| async move {
                let result = upsert(remote, session, &record).await;
                (record, result)
            })
            .buffer_unordered(UPSERT_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        let mut report = SyncReport::default();
        for (record, result) in results {
            match result {
                Ok(outcome) => {
                    debug!("{outcome:?} {} on {}", record.domain, record.date);
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!("Failed to sync {} on {}: {e:?}", record.domain, record.date);
                    report.failed += 1;
                }
            }
        }

        if report.succeeded > 0 {
            if let Err(e) = set_typed(self.aggregator.store(), LAST_SYNC_KEY, &now).await {
                error!("Failed to store sync checkpoint {e:?}");
            }
        }
        info!(
            "Synced {} records, {} failed",
            report.succeeded, report.failed
        );
        Ok(report)
    }

    /// Syncs immediately, then every `interval`, until `token` is cancelled. Cancellation also
    /// interrupts a batch in flight so no further requests are made.
    async fn run(&self, session: AuthSession, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                result = self.sync_once(&session) => {
                    if let Err(e) = result {
                        error!("Sync failed, retrying next period {e:?}");
                    }
                }
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.clock.sleep(self.interval) => (),
            }
        }
        info!("Sync stopped");
    }
}

impl<R: RemoteStore, S: KeyValueStore> SyncRelay<R, S> {
    /// Starts periodic sync for `session` on its own task. Cancelling `parent` stops it too.
    pub fn start(self: &Arc<Self>, session: AuthSession, parent: &CancellationToken) -> SyncHandle {
        let token = parent.child_token();
        let relay = self.clone();
        let task_token = token.clone();
        let span = tracing::info_span!("sync", user = %session.user_id);
        let task = tokio::spawn(async move { relay.run(session, task_token).await }.instrument(span));
        SyncHandle { token, task }
    }
}

/// Running periodic sync.
pub struct SyncHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Cancels the sync task. The returned handle resolves once it stopped.
    pub fn stop(self) -> JoinHandle<()> {
        self.token.cancel();
        self.task
    }
}
