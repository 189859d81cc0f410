use std::sync::Arc;

use anyhow::Result;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::utils::clock::Clock;

use super::{
    events::{json_lines::JsonLinesWriter, DomainQuery, Inbound, QueryKind, QueryReply, TabSource},
    storage::{aggregator::LedgerAggregator, kv::KeyValueStore},
    sync::{
        auth::{clear_session, load_session, save_session, AuthSession, AUTH_RETRY},
        remote::RemoteStore,
        SyncHandle, SyncRelay,
    },
    tracking::tracker::DwellTracker,
};

enum Step {
    Shutdown,
    Tick,
    Message(Result<Option<Inbound>>),
}

/// Single event loop owning the tracker. Tab events, queries and the periodic tick are
/// handled one at a time, so every flush completes before the next message is looked at.
pub struct TrackerHost<T, W, R, S> {
    source: T,
    replies: JsonLinesWriter<W>,
    tracker: DwellTracker<S>,
    aggregator: Arc<LedgerAggregator<S>>,
    relay: Option<Arc<SyncRelay<R, S>>>,
    sync: Option<SyncHandle>,
    clock: Box<dyn Clock>,
    shutdown: CancellationToken,
}

impl<T, W, R, S> TrackerHost<T, W, R, S>
where
    T: TabSource,
    W: AsyncWrite + Unpin + Send,
    R: RemoteStore,
    S: KeyValueStore,
{
    pub fn new(
        source: T,
        replies: JsonLinesWriter<W>,
        tracker: DwellTracker<S>,
        aggregator: Arc<LedgerAggregator<S>>,
        relay: Option<Arc<SyncRelay<R, S>>>,
        clock: Box<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            replies,
            tracker,
            aggregator,
            relay,
            sync: None,
            clock,
            shutdown,
        }
    }

    /// Runs until the input ends or shutdown is requested. Every open session is flushed
    /// before returning.
    pub async fn run(mut self) -> Result<()> {
        let result = self.event_loop().await;

        self.stop_sync().await;
        self.tracker.flush_all().await;
        self.shutdown.cancel();
        info!("Tracker stopped");
        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        let tabs = tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(()),
            tabs = self.source.open_tabs() => tabs?,
        };
        self.tracker.initialize(tabs).await;
        self.resume_sync().await;

        let interval = self.tracker.flush_interval();
        let mut next_tick = self.clock.instant() + interval;
        loop {
            let step = tokio::select! {
                _ = self.shutdown.cancelled() => Step::Shutdown,
                _ = self.clock.sleep_until(next_tick) => Step::Tick,
                message = self.source.next_message() => Step::Message(message),
            };

            match step {
                Step::Shutdown => return Ok(()),
                Step::Tick => {
                    next_tick += interval;
                    self.tracker
                        .tick()
                        .instrument(info_span!("Periodic flush"))
                        .await;
                }
                Step::Message(Ok(Some(message))) => self.dispatch(message).await,
                Step::Message(Ok(None)) => {
                    info!("Input closed");
                    return Ok(());
                }
                Step::Message(Err(e)) => {
                    error!("Failed to read input {e:?}");
                    return Err(e);
                }
            }
        }
    }

    async fn dispatch(&mut self, message: Inbound) {
        match message {
            Inbound::Snapshot(tabs) => self.tracker.initialize(tabs).await,
            Inbound::Tab(event) => self.tracker.handle_event(event).await,
            Inbound::Query(query) => self.answer(query).await,
            Inbound::Auth(session) => self.change_auth(session).await,
        }
    }

    async fn answer(&mut self, DomainQuery { request_id, domain, kind }: DomainQuery) {
        let seconds = match kind {
            QueryKind::CurrentSessionTime => self.tracker.current_session_time(&domain),
            QueryKind::TimeForDomain => match self.tracker.time_for_domain_today(&domain).await {
                Ok(seconds) => seconds,
                Err(e) => {
                    error!("Failed to read time for {domain}, answering with live time {e:?}");
                    self.tracker.current_session_time(&domain)
                }
            },
        };
        debug!("Answering {request_id} for {domain} with {seconds}s");
        if let Err(e) = self.replies.send(&QueryReply { request_id, seconds }).await {
            error!("Failed to send reply {request_id} {e:?}");
        }
    }

    async fn change_auth(&mut self, session: Option<AuthSession>) {
        self.stop_sync().await;
        match session {
            Some(session) => {
                info!("Signed in as {}", session.user_id);
                if let Err(e) = save_session(self.aggregator.store(), &session).await {
                    error!("Failed to persist auth session {e:?}");
                }
                self.start_sync(session);
            }
            None => {
                info!("Signed out");
                if let Err(e) = clear_session(self.aggregator.store()).await {
                    error!("Failed to clear auth session {e:?}");
                }
            }
        }
    }

    async fn resume_sync(&mut self) {
        if self.relay.is_none() {
            debug!("No remote configured, sync disabled");
            return;
        }
        let session = load_session(self.aggregator.store(), &*self.clock, &AUTH_RETRY).await;
        match session {
            Ok(Some(session)) => self.start_sync(session),
            Ok(None) => info!("Not signed in, sync disabled"),
            Err(e) => error!("Failed to load auth session, sync disabled {e:?}"),
        }
    }

    fn start_sync(&mut self, session: AuthSession) {
        if let Some(relay) = &self.relay {
            self.sync = Some(relay.start(session, &self.shutdown));
        }
    }

    async fn stop_sync(&mut self) {
        if let Some(sync) = self.sync.take() {
            if let Err(e) = sync.stop().await {
                error!("Sync task failed {e:?}");
            }
        }
    }
}
