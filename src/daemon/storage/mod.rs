//!  Storage is organized through [kv::KeyValueStore].
//!  The basic idea is:
//!   - Every piece of durable state is a JSON document under a key.
//!   - The ledger ([ledger::Ledger]) holds `date -> domain -> seconds`.
//!   - All ledger increments go through [aggregator::LedgerAggregator], which serializes them.

pub mod aggregator;
pub mod kv;
pub mod ledger;
#[cfg(test)]
pub mod memory;
