use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{daemon::sync::remote::RestRemoteStore, impact::ImpactFactors};

pub const CONFIG_FILE: &str = "config.json";

/// Settings shared by the daemon and the cli. Every field has a default so a partial
/// `config.json` is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub flush_interval_secs: u64,
    pub sync_interval_secs: u64,
    pub remote: RemoteConfig,
    pub impact: ImpactFactors,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flush_interval_secs: 30,
            sync_interval_secs: 30,
            remote: RemoteConfig::default(),
            impact: ImpactFactors::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Sync is disabled when unset.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub table: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            table: "tracking_data".into(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Default, Clone, clap::Args)]
pub struct ConfigOverrides {
    #[arg(long = "flush-interval", help = "Seconds between periodic flushes of open tabs")]
    pub flush_interval: Option<u64>,
    #[arg(long = "sync-interval", help = "Seconds between syncs with the remote store")]
    pub sync_interval: Option<u64>,
    #[arg(
        long = "remote-url",
        env = "GREENTAB_REMOTE_URL",
        help = "Base url of the remote store. Sync is disabled without one"
    )]
    pub remote_url: Option<String>,
}

impl Config {
    /// Reads `config.json` from the application directory, falling back to defaults when it
    /// doesn't exist.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {path:?}, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {path:?}")),
        };
        serde_json::from_str(&content).with_context(|| format!("Invalid config at {path:?}"))
    }

    pub fn apply(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(flush_interval) = overrides.flush_interval {
            self.flush_interval_secs = flush_interval;
        }
        if let Some(sync_interval) = overrides.sync_interval {
            self.sync_interval_secs = sync_interval;
        }
        if let Some(remote_url) = &overrides.remote_url {
            self.remote.base_url = Some(remote_url.clone());
        }
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    /// Client for the configured remote store, `None` when no remote is configured.
    pub fn remote_store(&self) -> Result<Option<RestRemoteStore>> {
        let Some(base_url) = &self.remote.base_url else {
            return Ok(None);
        };
        RestRemoteStore::new(
            base_url,
            &self.remote.table,
            self.remote.api_key.clone(),
            Duration::from_secs(self.remote.timeout_secs),
        )
        .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use tempfile::tempdir;

    use super::{Config, ConfigOverrides, CONFIG_FILE};

    #[test]
    fn test_missing_config_uses_defaults() -> Result<()> {
        let dir = tempdir()?;
        let config = Config::load(dir.path())?;
        assert_eq!(config, Config::default());
        assert_eq!(config.flush_interval(), Duration::from_secs(30));
        assert!(config.remote_store()?.is_none());
        Ok(())
    }

    #[test]
    fn test_partial_config() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"sync_interval_secs": 60, "remote": {"base_url": "https://backend.example"}, "impact": {"pages_per_minute": 1.0}}"#,
        )?;
        let config = Config::load(dir.path())?;
        assert_eq!(config.flush_interval_secs, 30);
        assert_eq!(config.sync_interval(), Duration::from_secs(60));
        assert_eq!(config.remote.table, "tracking_data");
        assert_eq!(config.impact.pages_per_minute, 1.);
        assert_eq!(config.impact.co2_per_page_view, 0.5);
        assert!(config.remote_store()?.is_some());
        Ok(())
    }

    #[test]
    fn test_invalid_config_fails() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join(CONFIG_FILE), "{not json")?;
        assert!(Config::load(dir.path()).is_err());
        Ok(())
    }

    #[test]
    fn test_overrides() {
        let overrides = ConfigOverrides {
            flush_interval: Some(5),
            sync_interval: None,
            remote_url: Some("http://localhost:54321".into()),
        };
        let config = Config::default().apply(&overrides);
        assert_eq!(config.flush_interval_secs, 5);
        assert_eq!(config.sync_interval_secs, 30);
        assert_eq!(
            config.remote.base_url.as_deref(),
            Some("http://localhost:54321")
        );
    }
}
