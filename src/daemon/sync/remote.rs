use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::utils::time::date_key;

use super::{auth::AuthSession, record::SyncedRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// No row matched the record's key.
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same key already exists.
    Conflict,
}

/// Remote table keyed by `(user_id, date, domain)`. Only update-if-exists and
/// insert-if-absent are required, upsert is built on top of them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn update(&self, session: &AuthSession, record: &SyncedRecord) -> Result<UpdateOutcome>;

    async fn insert(&self, session: &AuthSession, record: &SyncedRecord) -> Result<InsertOutcome>;
}

/// PostgREST style backend: `PATCH` with key filters for updates, `POST` for inserts.
pub struct RestRemoteStore {
    client: Client,
    table_url: String,
    api_key: Option<String>,
}

impl RestRemoteStore {
    pub fn new(
        base_url: &str,
        table: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            table_url: format!("{}/rest/v1/{table}", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    fn authorized(&self, builder: RequestBuilder, session: &AuthSession) -> RequestBuilder {
        let builder = builder.bearer_auth(&session.token);
        match &self.api_key {
            Some(key) => builder.header("apikey", key),
            None => builder,
        }
    }
}

/// Filters selecting exactly the row of `record`.
fn key_filter(record: &SyncedRecord) -> [(&'static str, String); 3] {
    [
        ("user_id", format!("eq.{}", record.user_id)),
        ("date", format!("eq.{}", date_key(record.date))),
        ("domain", format!("eq.{}", record.domain)),
    ]
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn update(&self, session: &AuthSession, record: &SyncedRecord) -> Result<UpdateOutcome> {
        let request = self
            .client
            .patch(&self.table_url)
            .query(&key_filter(record))
            .header("Prefer", "return=representation")
            .json(record);
        let response = self.authorized(request, session).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Update of {} on {} failed with {status}: {text}", record.domain, record.date);
        }
        let rows: Vec<Value> = response.json().await?;
        debug!("Update of {} on {} touched {} rows", record.domain, record.date, rows.len());
        if rows.is_empty() {
            Ok(UpdateOutcome::Missing)
        } else {
            Ok(UpdateOutcome::Updated)
        }
    }

    async fn insert(&self, session: &AuthSession, record: &SyncedRecord) -> Result<InsertOutcome> {
        let request = self
            .client
            .post(&self.table_url)
            .header("Prefer", "return=minimal")
            .json(record);
        let response = self.authorized(request, session).send().await?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Ok(InsertOutcome::Conflict);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Insert of {} on {} failed with {status}: {text}", record.domain, record.date);
        }
        Ok(InsertOutcome::Inserted)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{NaiveDate, TimeZone, Utc};

    use crate::daemon::sync::record::SyncedRecord;

    use super::{key_filter, RestRemoteStore};

    #[test]
    fn test_key_filter() {
        let record = SyncedRecord {
            user_id: "u-1".into(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            domain: "news.example.com".into(),
            total_seconds: 1,
            energy_wh: 0.,
            water_liters: 0.,
            co2_grams: 0.,
            synced_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        };
        assert_eq!(
            key_filter(&record),
            [
                ("user_id", "eq.u-1".to_string()),
                ("date", "eq.2024-05-01".to_string()),
                ("domain", "eq.news.example.com".to_string()),
            ]
        );
    }

    #[test]
    fn test_table_url() {
        let store = RestRemoteStore::new(
            "https://backend.example/",
            "tracking_data",
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(store.table_url, "https://backend.example/rest/v1/tracking_data");
    }
}
