//! File-backed store.
//!
//! One JSON file per entry under a state directory. Writes replace the
//! whole file; there is no locking across processes, concurrent instances
//! are eventually consistent by design.

use crate::error::{Error, Result};
use crate::store::KvStore;
use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.entry_path(name)).await {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Persistence(format!(
                "failed to read entry '{}': {}",
                name, err
            ))),
        }
    }

    async fn put(&self, name: &str, value: String) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|err| {
            Error::Persistence(format!(
                "failed to create state dir {}: {}",
                self.dir.display(),
                err
            ))
        })?;
        tokio::fs::write(self.entry_path(name), value)
            .await
            .map_err(|err| {
                Error::Persistence(format!("failed to write entry '{}': {}", name, err))
            })
    }
}
