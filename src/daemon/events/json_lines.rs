use std::collections::VecDeque;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::{debug, warn};

use crate::daemon::{sync::auth::AuthSession, tracking::sessions::TabId};

use super::{DomainQuery, Inbound, LoadStatus, OpenTab, QueryKind, QueryReply, TabEvent, TabSource};

/// One line of the daemon's input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WireMessage {
    OpenTabs {
        tabs: Vec<OpenTab>,
    },
    Created {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
    },
    Updated {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        url_changed: bool,
        #[serde(default)]
        status: Option<LoadStatus>,
    },
    Removed {
        tab_id: TabId,
    },
    GetTimeForDomain {
        request_id: u64,
        domain: String,
    },
    GetCurrentSessionTime {
        request_id: u64,
        domain: String,
    },
    AuthChanged {
        session: Option<AuthSession>,
    },
}

impl From<WireMessage> for Inbound {
    fn from(value: WireMessage) -> Self {
        match value {
            WireMessage::OpenTabs { tabs } => Inbound::Snapshot(tabs),
            WireMessage::Created { tab_id, url } => Inbound::Tab(TabEvent::Created { tab_id, url }),
            WireMessage::Updated {
                tab_id,
                url,
                url_changed,
                status,
            } => Inbound::Tab(TabEvent::Updated {
                tab_id,
                url,
                url_changed,
                status,
            }),
            WireMessage::Removed { tab_id } => Inbound::Tab(TabEvent::Removed { tab_id }),
            WireMessage::GetTimeForDomain { request_id, domain } => Inbound::Query(DomainQuery {
                request_id,
                domain,
                kind: QueryKind::TimeForDomain,
            }),
            WireMessage::GetCurrentSessionTime { request_id, domain } => {
                Inbound::Query(DomainQuery {
                    request_id,
                    domain,
                    kind: QueryKind::CurrentSessionTime,
                })
            }
            WireMessage::AuthChanged { session } => Inbound::Auth(session),
        }
    }
}

/// Reads one JSON message per line. Blank and malformed lines are skipped.
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    pending: VecDeque<Inbound>,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            pending: VecDeque::new(),
        }
    }

    async fn read_message(&mut self) -> Result<Option<Inbound>> {
        // `next_line` is cancel safe and nothing is held between iterations.
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<WireMessage>(line) {
                Ok(message) => {
                    debug!("Received {message:?}");
                    return Ok(Some(message.into()));
                }
                Err(e) => warn!("Skipping malformed message {line}: {e}"),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> TabSource for JsonLinesSource<R> {
    /// The browser side is expected to start with an `open_tabs` message. Anything else is
    /// kept for [TabSource::next_message] and no tabs are reported.
    async fn open_tabs(&mut self) -> Result<Vec<OpenTab>> {
        match self.read_message().await? {
            Some(Inbound::Snapshot(tabs)) => Ok(tabs),
            Some(other) => {
                warn!("Input didn't start with open tabs, starting with an empty table");
                self.pending.push_back(other);
                Ok(vec![])
            }
            None => Ok(vec![]),
        }
    }

    async fn next_message(&mut self) -> Result<Option<Inbound>> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }
        self.read_message().await
    }
}

/// Writes query replies as JSON lines.
pub struct JsonLinesWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn send(&mut self, reply: &QueryReply) -> Result<()> {
        let mut buffer = serde_json::to_vec(reply)?;
        buffer.push(b'\n');
        self.writer.write_all(&buffer).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
