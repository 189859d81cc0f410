use std::{
    io::ErrorKind,
    ops::Deref,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use fs4::tokio::AsyncFileExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::debug;

/// Asynchronous key-value storage. Mirrors what a browser extension gets from its local
/// storage area: whole JSON documents addressed by key.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl<T> KeyValueStore for T
where
    T: Deref + Send + Sync + 'static,
    T::Target: KeyValueStore,
{
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.deref().get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.deref().set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.deref().remove(key).await
    }
}

/// Typed access on top of [KeyValueStore].
pub async fn get_typed<T: DeserializeOwned>(
    store: &impl KeyValueStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => Ok(Some(
            serde_json::from_value(value).with_context(|| format!("Malformed value under {key}"))?,
        )),
        None => Ok(None),
    }
}

pub async fn set_typed<T: Serialize>(store: &impl KeyValueStore, key: &str, value: &T) -> Result<()> {
    store.set(key, serde_json::to_value(value)?).await
}

/// Stores every key as `<dir>/<key>.json`. Writes go through a temporary file followed by a
/// rename, so a crash mid-write leaves the previous document intact.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            bail!("Illegal storage key {key:?}");
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    async fn read(path: &Path) -> Result<Option<String>, std::io::Error> {
        let mut file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        file.lock_shared()?;
        let mut content = String::new();
        let result = file.read_to_string(&mut content).await;
        file.unlock_async().await?;
        result?;
        Ok(Some(content))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key)?;
        debug!("Reading {path:?}");
        let Some(content) = Self::read(&path).await? else {
            return Ok(None);
        };
        // A corrupted document is an error rather than an absent one. Treating it as absent
        // would let the next write replace everything stored under the key.
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Corrupted document in {path:?}"))?;
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let path = self.path_for(key)?;
        let temp = path.with_extension("json.tmp");
        let buffer = serde_json::to_vec(&value)?;

        let mut file = File::create(&temp).await?;
        file.lock_exclusive()?;
        let written = async {
            file.write_all(&buffer).await?;
            file.sync_all().await
        }
        .await;
        file.unlock_async().await?;
        written?;
        drop(file);

        tokio::fs::rename(&temp, &path).await?;
        debug!("Wrote {} bytes into {path:?}", buffer.len());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
