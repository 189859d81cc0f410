//! Aggregates over the local ledger shown by the cli. Impact is computed for every
//! `(date, domain)` entry and then summed, so totals match what the sync uploads row by row.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::{
    daemon::storage::ledger::Ledger,
    impact::{Impact, ImpactFactors},
    utils::time::date_range,
};

#[derive(Debug, Clone, PartialEq)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub seconds: u64,
    pub impact: Impact,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomainTotal {
    pub domain: String,
    pub seconds: u64,
    pub impact: Impact,
}

/// One aggregate for every day in `start..=end`, days without browsing included.
pub fn daily_aggregates(
    ledger: &Ledger,
    start: NaiveDate,
    end: NaiveDate,
    factors: &ImpactFactors,
) -> Vec<DailyAggregate> {
    date_range(start, end)
        .map(|date| {
            let mut aggregate = DailyAggregate {
                date,
                seconds: 0,
                impact: Impact::default(),
            };
            for (_, seconds) in ledger.day(date) {
                aggregate.seconds += seconds;
                aggregate.impact += factors.impact(seconds);
            }
            aggregate
        })
        .collect()
}

/// Domains browsed in `start..=end` ordered by energy, at most `limit` of them.
pub fn top_domains(
    ledger: &Ledger,
    start: NaiveDate,
    end: NaiveDate,
    factors: &ImpactFactors,
    limit: usize,
) -> Vec<DomainTotal> {
    let mut totals = HashMap::<&str, DomainTotal>::new();
    for entry in ledger.between(start, end).filter(|entry| entry.seconds > 0) {
        let total = totals.entry(entry.domain).or_insert_with(|| DomainTotal {
            domain: entry.domain.to_string(),
            seconds: 0,
            impact: Impact::default(),
        });
        total.seconds += entry.seconds;
        total.impact += factors.impact(entry.seconds);
    }

    let mut totals = totals.into_values().collect::<Vec<_>>();
    totals.sort_by(|a, b| {
        b.impact
            .energy_wh
            .total_cmp(&a.impact.energy_wh)
            .then_with(|| b.seconds.cmp(&a.seconds))
            .then_with(|| a.domain.cmp(&b.domain))
    });
    totals.truncate(limit);
    totals
}
