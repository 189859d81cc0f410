use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};

/// Opaque tab handle assigned by the browser.
pub type TabId = i64;

/// Accounting state of one open tab on one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabSession {
    pub domain: Arc<str>,
    pub session_start: DateTime<Utc>,
}

impl TabSession {
    /// Whole seconds since `session_start`. A clock that went backwards yields 0.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        (now - self.session_start).num_seconds().max(0) as u64
    }
}

/// Time accrued by a session up to the moment it was closed or checkpointed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElapsedInterval {
    pub tab_id: TabId,
    pub domain: Arc<str>,
    pub seconds: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No session existed, a new one was started.
    Started,
    /// A session on the same domain already exists. Its start time was kept.
    Unchanged,
    /// The tab moved to another domain. The old session was closed and a fresh one started.
    Replaced(ElapsedInterval),
}

/// Open, currently tracked tabs. Never contains entries for untrackable pages.
///
/// The table doesn't write anything itself: closing operations hand back an
/// [ElapsedInterval] that the caller is responsible for flushing.
#[derive(Debug, Default)]
pub struct TabSessionTable {
    sessions: HashMap<TabId, TabSession>,
}

impl TabSessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, tab_id: TabId, domain: Arc<str>, now: DateTime<Utc>) -> UpsertOutcome {
        match self.sessions.get(&tab_id) {
            Some(existing) if existing.domain == domain => UpsertOutcome::Unchanged,
            _ => {
                let previous = self.remove(tab_id, now);
                self.start(tab_id, domain, now);
                match previous {
                    Some(closed) => UpsertOutcome::Replaced(closed),
                    None => UpsertOutcome::Started,
                }
            }
        }
    }

    fn start(&mut self, tab_id: TabId, domain: Arc<str>, now: DateTime<Utc>) {
        self.sessions.insert(
            tab_id,
            TabSession {
                domain,
                session_start: now,
            },
        );
    }

    pub fn remove(&mut self, tab_id: TabId, now: DateTime<Utc>) -> Option<ElapsedInterval> {
        let session = self.sessions.remove(&tab_id)?;
        Some(ElapsedInterval {
            tab_id,
            seconds: session.elapsed_seconds(now),
            domain: session.domain,
        })
    }

    /// Read-only view used for live queries.
    pub fn snapshot(&self) -> impl Iterator<Item = (TabId, &TabSession)> {
        self.sessions.iter().map(|(id, session)| (*id, session))
    }

    pub fn get(&self, tab_id: TabId) -> Option<&TabSession> {
        self.sessions.get(&tab_id)
    }

    /// Unflushed seconds across every tab currently on `domain`.
    pub fn live_seconds(&self, domain: &str, now: DateTime<Utc>) -> u64 {
        self.snapshot()
            .filter(|(_, session)| &*session.domain == domain)
            .map(|(_, session)| session.elapsed_seconds(now))
            .sum()
    }

    /// Sessions that have accrued at least `threshold_seconds`.
    pub fn due(&self, threshold_seconds: u64, now: DateTime<Utc>) -> Vec<ElapsedInterval> {
        let mut due = self
            .snapshot()
            .map(|(tab_id, session)| ElapsedInterval {
                tab_id,
                domain: session.domain.clone(),
                seconds: session.elapsed_seconds(now),
            })
            .filter(|interval| interval.seconds >= threshold_seconds)
            .collect::<Vec<_>>();
        due.sort_by_key(|interval| interval.tab_id);
        due
    }

    /// Moves the start of a session forward by the persisted seconds. The sub-second remainder
    /// stays in the session and is carried into the next flush. Does nothing if the tab is gone
    /// or moved to another domain in the meantime.
    pub fn checkpoint(&mut self, persisted: &ElapsedInterval) {
        if let Some(session) = self.sessions.get_mut(&persisted.tab_id) {
            if session.domain == persisted.domain {
                session.session_start += chrono::Duration::seconds(persisted.seconds as i64);
            }
        }
    }

    /// Closes every session, e.g. before the process goes away.
    pub fn drain(&mut self, now: DateTime<Utc>) -> Vec<ElapsedInterval> {
        let mut closed = self
            .sessions
            .drain()
            .map(|(tab_id, session)| ElapsedInterval {
                tab_id,
                seconds: session.elapsed_seconds(now),
                domain: session.domain,
            })
            .collect::<Vec<_>>();
        closed.sort_by_key(|interval| interval.tab_id);
        closed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
