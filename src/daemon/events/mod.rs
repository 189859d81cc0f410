//! Inbound messages from the browser side. [TabSource] abstracts over where they come from,
//! [json_lines] implements the line based protocol used by `greentab-daemon`.

pub mod json_lines;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{sync::auth::AuthSession, tracking::sessions::TabId};

/// A tab that is open when the process starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenTab {
    pub tab_id: TabId,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Loading,
    Complete,
}

/// The three tab lifecycle events the tracker consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
    Created {
        tab_id: TabId,
        url: Option<String>,
    },
    Updated {
        tab_id: TabId,
        /// Current URL of the tab.
        url: Option<String>,
        url_changed: bool,
        status: Option<LoadStatus>,
    },
    Removed {
        tab_id: TabId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Persisted seconds for today plus live sessions.
    TimeForDomain,
    /// Live sessions only.
    CurrentSessionTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainQuery {
    pub request_id: u64,
    pub domain: String,
    pub kind: QueryKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryReply {
    pub request_id: u64,
    pub seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Re-enumeration of all open tabs.
    Snapshot(Vec<OpenTab>),
    Tab(TabEvent),
    Query(DomainQuery),
    /// Sign in (`Some`) or sign out (`None`).
    Auth(Option<AuthSession>),
}

/// Source of browser side messages.
#[async_trait]
pub trait TabSource: Send {
    /// Tabs open at process start.
    async fn open_tabs(&mut self) -> Result<Vec<OpenTab>>;

    /// Next message, `None` once the source is exhausted. Must be cancel safe, it's polled
    /// inside `select!`.
    async fn next_message(&mut self) -> Result<Option<Inbound>>;
}
