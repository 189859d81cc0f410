use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Storage key of the ledger. Shared with the browser extension's storage layout.
pub const LEDGER_KEY: &str = "greenTabTracking";

/// Durable `date -> domain -> seconds` structure. Serialized as a plain nested JSON object,
/// e.g. `{"2024-05-01": {"example.com": 120}}`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    days: BTreeMap<NaiveDate, BTreeMap<String, u64>>,
}

/// A single `(date, domain, seconds)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry<'a> {
    pub date: NaiveDate,
    pub domain: &'a str,
    pub seconds: u64,
}

impl Ledger {
    /// Increments the entry for `date`/`domain`, creating it if absent. Returns the new total.
    pub fn add(&mut self, date: NaiveDate, domain: &str, seconds: u64) -> u64 {
        let total = self
            .days
            .entry(date)
            .or_default()
            .entry(domain.to_string())
            .or_default();
        *total = total.saturating_add(seconds);
        *total
    }

    pub fn get(&self, date: NaiveDate, domain: &str) -> u64 {
        self.days
            .get(&date)
            .and_then(|domains| domains.get(domain))
            .copied()
            .unwrap_or(0)
    }

    pub fn day(&self, date: NaiveDate) -> impl Iterator<Item = (&str, u64)> {
        self.days
            .get(&date)
            .into_iter()
            .flat_map(|domains| domains.iter().map(|(domain, seconds)| (domain.as_str(), *seconds)))
    }

    pub fn entries(&self) -> impl Iterator<Item = LedgerEntry<'_>> {
        self.days.iter().flat_map(|(date, domains)| {
            domains.iter().map(|(domain, seconds)| LedgerEntry {
                date: *date,
                domain,
                seconds: *seconds,
            })
        })
    }

    /// Entries with `start <= date <= end`.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = LedgerEntry<'_>> {
        let range = if start <= end {
            Some(self.days.range(start..=end))
        } else {
            None
        };
        range.into_iter().flatten().flat_map(|(date, domains)| {
            domains.iter().map(|(domain, seconds)| LedgerEntry {
                date: *date,
                domain,
                seconds: *seconds,
            })
        })
    }

    pub fn is_empty(&self) -> bool {
        self.days.values().all(|domains| domains.is_empty())
    }
}
