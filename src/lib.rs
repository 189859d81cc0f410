//! Tracks how long browser tabs dwell on each domain and estimates the environmental cost of
//! that time. The daemon keeps a durable per-day ledger fed by tab events, the cli reports on
//! it and optionally pushes it to a remote store.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod impact;
pub mod utils;
