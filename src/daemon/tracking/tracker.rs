use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    daemon::{
        events::{LoadStatus, OpenTab, TabEvent},
        storage::{aggregator::LedgerAggregator, kv::KeyValueStore},
    },
    domain::extract_domain,
    utils::clock::Clock,
};

use super::sessions::{ElapsedInterval, TabId, TabSessionTable, UpsertOutcome};

/// Seconds that couldn't be persisted when their session closed. Retried on every tick with
/// the date they were originally attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingFlush {
    domain: Arc<str>,
    seconds: u64,
    date: NaiveDate,
}

/// Result of a periodic tick, used for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub checkpointed: usize,
    pub failed: usize,
    pub retried: usize,
}

/// Attributes wall-clock time to the domain of every open tab.
///
/// Per tab the tracker is either untracked (no entry in the session table) or tracking a single
/// domain. Moving a tab to a different domain always closes the old session and opens a new
/// one, so an interval is never attributed to two domains.
///
/// Flushes are awaited inside the caller's event loop. A tab's entry is never touched again
/// before its previous flush completed, which keeps increments ordered.
pub struct DwellTracker<S> {
    sessions: TabSessionTable,
    aggregator: Arc<LedgerAggregator<S>>,
    clock: Box<dyn Clock>,
    flush_interval: Duration,
    backlog: Vec<PendingFlush>,
}

impl<S: KeyValueStore> DwellTracker<S> {
    pub fn new(
        aggregator: Arc<LedgerAggregator<S>>,
        clock: Box<dyn Clock>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            sessions: TabSessionTable::new(),
            aggregator,
            clock,
            flush_interval,
            backlog: vec![],
        }
    }

    pub fn sessions(&self) -> &TabSessionTable {
        &self.sessions
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Re-establishes tracking for the tabs open at process start. Time accrued before the
    /// restart is gone with the previous process, sessions start now.
    #[instrument(skip_all, fields(tabs = tabs.len()))]
    pub async fn initialize(&mut self, tabs: Vec<OpenTab>) {
        for tab in tabs {
            if let Some(url) = tab.url {
                self.track(tab.tab_id, &url).await;
            }
        }
        info!("Tracking {} tabs after start", self.sessions.len());
    }

    pub async fn handle_event(&mut self, event: TabEvent) {
        match event {
            TabEvent::Created {
                tab_id,
                url: Some(url),
            } => self.track(tab_id, &url).await,
            TabEvent::Created { url: None, .. } => (),
            TabEvent::Updated {
                tab_id,
                url: Some(url),
                url_changed,
                status,
            } if url_changed || status == Some(LoadStatus::Complete) => {
                self.track(tab_id, &url).await
            }
            TabEvent::Updated { .. } => (),
            TabEvent::Removed { tab_id } => self.untrack(tab_id).await,
        }
    }

    /// Moves `tab_id` into the tracking state for the domain of `url`. Untrackable pages move
    /// the tab out of it.
    pub async fn track(&mut self, tab_id: TabId, url: &str) {
        let Some(domain) = extract_domain(url) else {
            debug!("Tab {tab_id} is on an untrackable page");
            self.untrack(tab_id).await;
            return;
        };
        let now = self.clock.time();
        match self.sessions.upsert(tab_id, domain.clone(), now) {
            UpsertOutcome::Started => debug!("Started tracking tab {tab_id} on {domain}"),
            UpsertOutcome::Unchanged => (),
            UpsertOutcome::Replaced(closed) => {
                debug!("Tab {tab_id} moved from {} to {domain}", closed.domain);
                self.flush_closed(closed).await;
            }
        }
    }

    pub async fn untrack(&mut self, tab_id: TabId) {
        let now = self.clock.time();
        if let Some(closed) = self.sessions.remove(tab_id, now) {
            debug!("Stopped tracking tab {tab_id} on {}", closed.domain);
            self.flush_closed(closed).await;
        }
    }

    async fn flush_closed(&mut self, closed: ElapsedInterval) {
        if closed.seconds == 0 {
            return;
        }
        let date = self.clock.today();
        if let Err(e) = self
            .aggregator
            .add_seconds(&closed.domain, closed.seconds, date)
            .await
        {
            error!(
                "Failed to persist {}s for {}, keeping them for the next tick: {e:?}",
                closed.seconds, closed.domain
            );
            self.enqueue(PendingFlush {
                domain: closed.domain,
                seconds: closed.seconds,
                date,
            });
        }
    }

    /// Adds to the backlog, merging with an existing entry for the same date and domain so an
    /// outage grows the backlog per domain rather than per closed tab.
    fn enqueue(&mut self, pending: PendingFlush) {
        match self
            .backlog
            .iter_mut()
            .find(|queued| queued.date == pending.date && queued.domain == pending.domain)
        {
            Some(queued) => queued.seconds = queued.seconds.saturating_add(pending.seconds),
            None => self.backlog.push(pending),
        }
    }

    /// Periodic checkpoint. Retries the backlog, then persists every session that accrued at
    /// least one flush interval and moves its start forward by the persisted whole seconds.
    /// Sessions whose flush fails keep their start, so the time is persisted on a later tick
    /// instead of being dropped.
    #[instrument(skip(self))]
    pub async fn tick(&mut self) -> TickSummary {
        let mut summary = TickSummary::default();

        for pending in std::mem::take(&mut self.backlog) {
            match self
                .aggregator
                .add_seconds(&pending.domain, pending.seconds, pending.date)
                .await
            {
                Ok(_) => summary.retried += 1,
                Err(e) => {
                    warn!("Retry of {}s for {} failed: {e:?}", pending.seconds, pending.domain);
                    self.enqueue(pending);
                }
            }
        }

        let now = self.clock.time();
        let date = self.clock.today();
        for due in self.sessions.due(self.flush_interval.as_secs(), now) {
            if due.seconds == 0 {
                continue;
            }
            match self.aggregator.add_seconds(&due.domain, due.seconds, date).await {
                Ok(_) => {
                    self.sessions.checkpoint(&due);
                    summary.checkpointed += 1;
                }
                Err(e) => {
                    error!("Checkpoint of tab {} failed: {e:?}", due.tab_id);
                    summary.failed += 1;
                }
            }
        }

        debug!("Tick finished {summary:?}");
        summary
    }

    /// Closes every session. Used when the process is about to lose its in-memory state.
    pub async fn flush_all(&mut self) {
        let now = self.clock.time();
        for closed in self.sessions.drain(now) {
            self.flush_closed(closed).await;
        }
        if !self.backlog.is_empty() {
            // Last chance for the backlog, nothing retries after this.
            self.tick().await;
        }
        if !self.backlog.is_empty() {
            error!("Dropping {} unpersisted flushes on exit", self.backlog.len());
        }
    }

    /// Live seconds across every tab on `domain`.
    pub fn current_session_time(&self, domain: &str) -> u64 {
        self.sessions.live_seconds(domain, self.clock.time())
    }

    /// Everything known for `domain` today: persisted total, unpersisted backlog and live
    /// sessions.
    pub async fn time_for_domain_today(&self, domain: &str) -> Result<u64> {
        let today = self.clock.today();
        let persisted = self.aggregator.total_for(today, domain).await?;
        let backlog = self
            .backlog
            .iter()
            .filter(|pending| pending.date == today && &*pending.domain == domain)
            .map(|pending| pending.seconds)
            .sum::<u64>();
        Ok(persisted + backlog + self.current_session_time(domain))
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

    use crate::{
        daemon::{
            events::{LoadStatus, OpenTab, TabEvent},
            storage::{aggregator::LedgerAggregator, memory::MemoryStore},
        },
        utils::clock::ManualClock,
    };

    use super::{DwellTracker, TickSummary};

    const TODAY: NaiveDate = NaiveDate::from_ymd_opt(2018, 7, 4).unwrap();

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(TODAY, NaiveTime::from_hms_opt(12, 0, 0).unwrap());

    struct Fixture {
        clock: ManualClock,
        store: Arc<MemoryStore>,
        aggregator: Arc<LedgerAggregator<Arc<MemoryStore>>>,
        tracker: DwellTracker<Arc<MemoryStore>>,
    }

    fn start() -> DateTime<Utc> {
        Utc.from_utc_datetime(&TEST_START_DATE)
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(start());
        let store = Arc::new(MemoryStore::new());
        let aggregator = Arc::new(LedgerAggregator::new(store.clone()));
        let tracker = DwellTracker::new(
            aggregator.clone(),
            Box::new(clock.clone()),
            Duration::from_secs(30),
        );
        Fixture {
            clock,
            store,
            aggregator,
            tracker,
        }
    }

    fn created(tab_id: i64, url: &str) -> TabEvent {
        TabEvent::Created {
            tab_id,
            url: Some(url.into()),
        }
    }

    fn navigated(tab_id: i64, url: &str) -> TabEvent {
        TabEvent::Updated {
            tab_id,
            url: Some(url.into()),
            url_changed: true,
            status: Some(LoadStatus::Loading),
        }
    }

    fn loaded(tab_id: i64, url: &str) -> TabEvent {
        TabEvent::Updated {
            tab_id,
            url: Some(url.into()),
            url_changed: false,
            status: Some(LoadStatus::Complete),
        }
    }

    async fn persisted(f: &Fixture, domain: &str) -> Result<u64> {
        f.aggregator.total_for(TODAY, domain).await
    }

    #[tokio::test]
    async fn test_tick_then_close() -> Result<()> {
        let mut f = fixture();
        f.tracker.handle_event(created(1, "https://example.com/")).await;

        f.clock.advance(30);
        assert_eq!(
            f.tracker.tick().await,
            TickSummary {
                checkpointed: 1,
                ..Default::default()
            }
        );
        assert_eq!(persisted(&f, "example.com").await?, 30);

        f.clock.advance(20);
        f.tracker
            .handle_event(TabEvent::Removed { tab_id: 1 })
            .await;

        assert_eq!(persisted(&f, "example.com").await?, 50);
        assert!(f.tracker.sessions().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_late_tick_then_close() -> Result<()> {
        let mut f = fixture();
        f.tracker.handle_event(created(1, "https://example.com/")).await;

        f.clock.advance(45);
        assert_eq!(f.tracker.tick().await.checkpointed, 1);
        f.clock.advance(5);
        f.tracker
            .handle_event(TabEvent::Removed { tab_id: 1 })
            .await;

        assert_eq!(persisted(&f, "example.com").await?, 50);
        Ok(())
    }

    #[tokio::test]
    async fn test_fractional_ticks_lose_nothing() -> Result<()> {
        let mut f = fixture();
        f.tracker.handle_event(created(1, "https://a.com")).await;

        for step in 1..=240 {
            f.clock
                .set(start() + chrono::Duration::milliseconds(30_900 * step));
            f.tracker.tick().await;
        }
        f.tracker
            .handle_event(TabEvent::Removed { tab_id: 1 })
            .await;

        // 240 * 30.9s
        assert_eq!(persisted(&f, "a.com").await?, 7416);
        Ok(())
    }

    #[tokio::test]
    async fn test_domain_switch() -> Result<()> {
        let mut f = fixture();
        f.tracker.handle_event(created(1, "https://a.com")).await;
        f.clock.advance(10);
        f.tracker.handle_event(navigated(1, "https://b.com/x")).await;
        f.clock.advance(15);
        f.tracker
            .handle_event(TabEvent::Removed { tab_id: 1 })
            .await;

        assert_eq!(persisted(&f, "a.com").await?, 10);
        assert_eq!(persisted(&f, "b.com").await?, 15);
        Ok(())
    }

    #[tokio::test]
    async fn test_redundant_events_keep_session_start() -> Result<()> {
        let mut f = fixture();
        f.tracker.handle_event(created(1, "https://a.com")).await;
        f.clock.advance(5);
        f.tracker.handle_event(navigated(1, "https://a.com/page")).await;
        f.clock.advance(5);
        f.tracker.handle_event(loaded(1, "https://a.com/page")).await;

        let session = f.tracker.sessions().get(1).unwrap();
        assert_eq!(session.session_start, start());
        assert_eq!(f.tracker.current_session_time("a.com"), 10);
        assert_eq!(persisted(&f, "a.com").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_ignored_events() -> Result<()> {
        let mut f = fixture();
        f.tracker
            .handle_event(TabEvent::Created {
                tab_id: 1,
                url: None,
            })
            .await;
        f.tracker.handle_event(created(2, "chrome://newtab")).await;
        f.tracker
            .handle_event(TabEvent::Updated {
                tab_id: 3,
                url: Some("https://a.com".into()),
                url_changed: false,
                status: Some(LoadStatus::Loading),
            })
            .await;
        f.tracker
            .handle_event(TabEvent::Removed { tab_id: 99 })
            .await;

        assert!(f.tracker.sessions().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_navigating_to_internal_page_untracks() -> Result<()> {
        let mut f = fixture();
        f.tracker.handle_event(created(1, "https://a.com")).await;
        f.clock.advance(12);
        f.tracker.handle_event(navigated(1, "chrome://settings")).await;
        f.clock.advance(100);

        assert!(f.tracker.sessions().is_empty());
        assert_eq!(persisted(&f, "a.com").await?, 12);
        Ok(())
    }

    #[tokio::test]
    async fn test_tick_skips_young_sessions() -> Result<()> {
        let mut f = fixture();
        f.tracker.handle_event(created(1, "https://a.com")).await;
        f.clock.advance(20);
        f.tracker.handle_event(created(2, "https://b.com")).await;
        f.clock.advance(15);

        let summary = f.tracker.tick().await;
        assert_eq!(summary.checkpointed, 1);
        assert_eq!(persisted(&f, "a.com").await?, 35);
        assert_eq!(persisted(&f, "b.com").await?, 0);
        assert_eq!(f.tracker.current_session_time("b.com"), 15);
        assert_eq!(f.tracker.current_session_time("a.com"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_tick_keeps_session_start() -> Result<()> {
        let mut f = fixture();
        f.tracker.handle_event(created(1, "https://a.com")).await;
        f.clock.advance(30);

        f.store.fail_writes(true);
        let summary = f.tracker.tick().await;
        assert_eq!(summary.failed, 1);
        assert_eq!(f.tracker.sessions().get(1).unwrap().session_start, start());

        f.store.fail_writes(false);
        f.clock.advance(30);
        let summary = f.tracker.tick().await;
        assert_eq!(summary.checkpointed, 1);
        assert_eq!(persisted(&f, "a.com").await?, 60);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_close_is_retried() -> Result<()> {
        let mut f = fixture();
        f.tracker.handle_event(created(1, "https://a.com")).await;
        f.clock.advance(10);

        f.store.fail_writes(true);
        f.tracker
            .handle_event(TabEvent::Removed { tab_id: 1 })
            .await;
        // Not persisted, but still visible to queries.
        assert_eq!(f.tracker.time_for_domain_today("a.com").await?, 10);

        // The tracker keeps working for new tabs while storage is down.
        f.tracker.handle_event(created(2, "https://b.com")).await;
        assert_eq!(f.tracker.sessions().len(), 1);

        f.store.fail_writes(false);
        let summary = f.tracker.tick().await;
        assert_eq!(summary.retried, 1);
        assert_eq!(persisted(&f, "a.com").await?, 10);
        assert_eq!(f.tracker.time_for_domain_today("a.com").await?, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_backlog_merges_same_domain() -> Result<()> {
        let mut f = fixture();
        for tab_id in 1..=3 {
            f.tracker.handle_event(created(tab_id, "https://a.com")).await;
        }
        f.tracker.handle_event(created(4, "https://b.com")).await;
        f.clock.advance(10);

        f.store.fail_writes(true);
        for tab_id in 1..=4 {
            f.tracker
                .handle_event(TabEvent::Removed { tab_id })
                .await;
        }
        assert_eq!(f.tracker.backlog.len(), 2);
        assert_eq!(f.tracker.time_for_domain_today("a.com").await?, 30);

        f.store.fail_writes(false);
        assert_eq!(f.tracker.tick().await.retried, 2);
        assert_eq!(persisted(&f, "a.com").await?, 30);
        assert_eq!(persisted(&f, "b.com").await?, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_time_for_domain_today_is_monotonic() -> Result<()> {
        let mut f = fixture();
        f.tracker.handle_event(created(1, "https://a.com")).await;
        f.tracker.handle_event(created(2, "https://a.com/other")).await;

        let mut previous = 0;
        for step in 0..10 {
            f.clock.advance(7);
            if step % 3 == 0 {
                f.tracker.tick().await;
            }
            let total = f.tracker.time_for_domain_today("a.com").await?;
            assert!(total >= previous);
            previous = total;
        }
        // Two tabs for 70 seconds each.
        assert_eq!(previous, 140);
        Ok(())
    }

    #[tokio::test]
    async fn test_total_within_one_interval() -> Result<()> {
        let mut f = fixture();
        f.tracker.handle_event(created(1, "https://a.com")).await;
        for _ in 0..20 {
            f.clock.advance(13);
            f.tracker.tick().await;
            f.tracker.handle_event(loaded(1, "https://a.com/next")).await;
        }
        f.tracker
            .handle_event(TabEvent::Removed { tab_id: 1 })
            .await;
        assert_eq!(persisted(&f, "a.com").await?, 260);
        Ok(())
    }

    #[tokio::test]
    async fn test_restart_drops_unflushed_time() -> Result<()> {
        let mut f = fixture();
        f.tracker.handle_event(created(1, "https://a.com")).await;
        f.clock.advance(25);

        // The process dies without flushing. A new tracker takes over the same storage.
        let mut restarted = DwellTracker::new(
            f.aggregator.clone(),
            Box::new(f.clock.clone()),
            Duration::from_secs(30),
        );
        f.clock.advance(5);
        restarted
            .initialize(vec![
                OpenTab {
                    tab_id: 1,
                    url: Some("https://a.com".into()),
                },
                OpenTab {
                    tab_id: 2,
                    url: Some("about:blank".into()),
                },
                OpenTab {
                    tab_id: 3,
                    url: None,
                },
            ])
            .await;

        assert_eq!(restarted.sessions().len(), 1);
        assert_eq!(restarted.time_for_domain_today("a.com").await?, 0);

        f.clock.advance(40);
        restarted.untrack(1).await;
        assert_eq!(persisted(&f, "a.com").await?, 40);
        Ok(())
    }

    #[tokio::test]
    async fn test_flush_all() -> Result<()> {
        let mut f = fixture();
        f.tracker.handle_event(created(1, "https://a.com")).await;
        f.tracker.handle_event(created(2, "https://b.com")).await;
        f.clock.advance(8);
        f.tracker.flush_all().await;

        assert!(f.tracker.sessions().is_empty());
        assert_eq!(persisted(&f, "a.com").await?, 8);
        assert_eq!(persisted(&f, "b.com").await?, 8);
        Ok(())
    }

    #[tokio::test]
    async fn test_flush_date_is_taken_at_flush_time() -> Result<()> {
        let mut f = fixture();
        f.clock
            .set(Utc.from_utc_datetime(&TODAY.and_hms_opt(23, 59, 50).unwrap()));
        f.tracker.handle_event(created(1, "https://a.com")).await;
        f.clock.advance(20);
        f.tracker.untrack(1).await;

        let tomorrow = TODAY.succ_opt().unwrap();
        assert_eq!(f.aggregator.total_for(TODAY, "a.com").await?, 0);
        assert_eq!(f.aggregator.total_for(tomorrow, "a.com").await?, 20);
        Ok(())
    }
}
