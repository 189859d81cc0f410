use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{daemon::storage::ledger::Ledger, impact::ImpactFactors};

/// Remote mirror of one ledger entry, keyed by `(user_id, date, domain)`. Pushing a record
/// replaces the remote totals, it never adds to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedRecord {
    pub user_id: String,
    pub date: NaiveDate,
    pub domain: String,
    pub total_seconds: u64,
    pub energy_wh: f64,
    pub water_liters: f64,
    pub co2_grams: f64,
    pub synced_at: DateTime<Utc>,
}

/// One record per nonzero ledger entry.
pub fn build_records(
    ledger: &Ledger,
    user_id: &str,
    factors: &ImpactFactors,
    synced_at: DateTime<Utc>,
) -> Vec<SyncedRecord> {
    ledger
        .entries()
        .filter(|entry| entry.seconds > 0)
        .map(|entry| {
            let impact = factors.impact(entry.seconds);
            SyncedRecord {
                user_id: user_id.to_string(),
                date: entry.date,
                domain: entry.domain.to_string(),
                total_seconds: entry.seconds,
                energy_wh: impact.energy_wh,
                water_liters: impact.water_liters,
                co2_grams: impact.co2_grams,
                synced_at,
            }
        })
        .collect()
}
