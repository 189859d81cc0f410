use anyhow::Result;
use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{
    kv::{get_typed, set_typed, KeyValueStore},
    ledger::{Ledger, LEDGER_KEY},
};

/// Merges flushed durations into the persisted [Ledger].
///
/// Every increment is a read-modify-write of the whole ledger document. Writers are serialized
/// through `write_lock`, so increments coming from the periodic tick and from tab removal never
/// overwrite each other.
pub struct LedgerAggregator<S> {
    store: S,
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> LedgerAggregator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Underlying storage. Other state (auth session, sync checkpoints) lives next to the
    /// ledger.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn ledger(&self) -> Result<Ledger> {
        Ok(get_typed::<Ledger>(&self.store, LEDGER_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Adds `seconds` to the `date`/`domain` entry and returns the new persisted total.
    #[instrument(skip(self))]
    pub async fn add_seconds(&self, domain: &str, seconds: u64, date: NaiveDate) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut ledger = self.ledger().await?;
        let total = ledger.add(date, domain, seconds);
        set_typed(&self.store, LEDGER_KEY, &ledger).await?;
        debug!("Ledger total for {domain} on {date} is now {total}s");
        Ok(total)
    }

    /// Persisted seconds for `date`/`domain`. Doesn't include live sessions.
    pub async fn total_for(&self, date: NaiveDate, domain: &str) -> Result<u64> {
        Ok(self.ledger().await?.get(date, domain))
    }
}
