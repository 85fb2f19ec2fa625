// src/store/file.rs

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{KvStore, StoreError};

/// Store backed by a flat TOML table of string keys and values.
///
/// Writes go to a sibling temp file which is then renamed over the
/// original, so a crash never leaves a half-written table behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        toml::from_str(&contents)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display())))
    }

    async fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let contents = toml::to_string(entries)
            .map_err(|e| StoreError::Corrupt(format!("serialising store: {e}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.load().await?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.load().await?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries).await?;

        debug!(path = %self.path.display(), key, "store entry written");
        Ok(())
    }
}
