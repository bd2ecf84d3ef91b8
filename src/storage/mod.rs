//! Object storage seen as `(bucket, key)` blobs.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

pub mod gcs;
pub mod local;

pub use gcs::GcsBlobStore;
pub use local::LocalBlobStore;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Copy the blob to `dst`, returning the byte count.
    async fn download(&self, bucket: &str, key: &str, dst: &Path) -> Result<u64>;

    /// Copy `src` to the blob, returning the byte count.
    async fn upload(&self, src: &Path, bucket: &str, key: &str) -> Result<u64>;
}
