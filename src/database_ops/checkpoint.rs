//! Durable page cursors for the listing sync jobs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::error::CheckpointError;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last committed page for `key`; 0 when nothing was saved.
    async fn load(&self, key: &str) -> Result<u32, CheckpointError>;

    async fn save(&self, key: &str, page: u32) -> Result<(), CheckpointError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Cursor {
    page: u32,
}

/// `{dir}/{key}.json` holding `{"page": N}`.
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    dir: PathBuf,
}

impl FileCheckpoint {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpoint {
    async fn load(&self, key: &str) -> Result<u32, CheckpointError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(serde_json::from_slice::<Cursor>(&bytes)?.page),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, page: u32) -> Result<(), CheckpointError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&Cursor { page })?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpoint {
    pages: Arc<Mutex<HashMap<String, u32>>>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoint {
    async fn load(&self, key: &str) -> Result<u32, CheckpointError> {
        Ok(self.pages.lock().await.get(key).copied().unwrap_or(0))
    }

    async fn save(&self, key: &str, page: u32) -> Result<(), CheckpointError> {
        self.pages.lock().await.insert(key.to_string(), page);
        Ok(())
    }
}
