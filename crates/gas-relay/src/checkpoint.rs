//! Durable cursor of the last source-chain block that was fully processed.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Storage for the poller's checkpoint. A missing checkpoint is reported as
/// `Ok(None)`: that is the first-run state, not an error.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self) -> Result<Option<u64>>;

    async fn store(&self, block: u64) -> Result<()>;
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn load(&self) -> Result<Option<u64>> {
        (**self).load().await
    }

    async fn store(&self, block: u64) -> Result<()> {
        (**self).store(block).await
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    last_block: u64,
}

/// Keeps the checkpoint in a small JSON file, replaced atomically on every
/// write.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Option<u64>> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).wrap_err_with(|| {
                    format!("failed to read checkpoint {}", self.path.display())
                });
            }
        };

        let file: CheckpointFile = serde_json::from_slice(&contents)
            .wrap_err_with(|| format!("corrupt checkpoint file {}", self.path.display()))?;
        Ok(Some(file.last_block))
    }

    async fn store(&self, block: u64) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err("failed to create checkpoint directory")?;
        }

        let contents = serde_json::to_vec_pretty(&CheckpointFile { last_block: block })?;
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, contents)
            .await
            .wrap_err_with(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .wrap_err_with(|| format!("failed to replace {}", self.path.display()))?;

        debug!(block, path = %self.path.display(), "checkpoint persisted");
        Ok(())
    }
}

/// Non-durable store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    block: Mutex<Option<u64>>,
}

impl InMemoryCheckpointStore {
    pub fn new(block: Option<u64>) -> Self {
        Self {
            block: Mutex::new(block),
        }
    }

    pub fn get(&self) -> Option<u64> {
        *self.block.lock()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self) -> Result<Option<u64>> {
        Ok(self.get())
    }

    async fn store(&self, block: u64) -> Result<()> {
        *self.block.lock() = Some(block);
        Ok(())
    }
}
