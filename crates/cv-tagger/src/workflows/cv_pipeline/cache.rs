use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::domain::ContentKey;
use super::error::PipelineError;

/// Persistent store of extracted text, keyed by document identity.
#[async_trait]
pub trait ExtractionCache: Send + Sync {
    async fn has(&self, key: &ContentKey) -> bool;
    async fn get(&self, key: &ContentKey) -> Result<String, PipelineError>;
    async fn put(&self, key: &ContentKey, text: &str) -> Result<(), PipelineError>;
}

/// One markdown file per key under `root`. Entries survive across runs.
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &ContentKey) -> PathBuf {
        self.root.join(format!("{}.md", key.as_str()))
    }
}

#[async_trait]
impl ExtractionCache for FileCache {
    async fn has(&self, key: &ContentKey) -> bool {
        tokio::fs::try_exists(self.path_for(key))
            .await
            .unwrap_or(false)
    }

    async fn get(&self, key: &ContentKey) -> Result<String, PipelineError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(PipelineError::NotFound(key.to_string()))
            }
            Err(err) => Err(PipelineError::Io(err)),
        }
    }

    async fn put(&self, key: &ContentKey, text: &str) -> Result<(), PipelineError> {
        let cache_write = |source| PipelineError::CacheWrite {
            key: key.to_string(),
            source,
        };
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(cache_write)?;
        let path = self.path_for(key);
        tokio::fs::write(&path, text).await.map_err(cache_write)?;
        debug!(key = %key, path = %path.display(), "cached extracted text");
        Ok(())
    }
}
