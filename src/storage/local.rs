use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::BlobStore;
use crate::stage::part_path;

/// Directory-backed store: `<root>/<bucket>/<key>`. Used for offline runs and tests.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(fs::try_exists(self.path(bucket, key)).await?)
    }

    async fn download(&self, bucket: &str, key: &str, dst: &Path) -> Result<u64> {
        let src = self.path(bucket, key);
        fs::copy(&src, dst)
            .await
            .with_context(|| format!("copying {} -> {}", src.display(), dst.display()))
    }

    async fn upload(&self, src: &Path, bucket: &str, key: &str) -> Result<u64> {
        let dst = self.path(bucket, key);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        // objects appear whole or not at all
        let tmp = part_path(&dst);
        let n = fs::copy(src, &tmp)
            .await
            .with_context(|| format!("copying {} -> {}", src.display(), tmp.display()))?;
        fs::rename(&tmp, &dst).await?;
        Ok(n)
    }
}
