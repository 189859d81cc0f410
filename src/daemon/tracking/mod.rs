//! Dwell time accounting: [sessions::TabSessionTable] holds the volatile per-tab state,
//! [tracker::DwellTracker] drives it from tab events and the periodic tick.

pub mod sessions;
pub mod tracker;
