use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use google_cloud_storage::http::Error as GcsError;
use std::path::Path;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, info};

use super::BlobStore;

/// Google Cloud Storage, authenticated with application default credentials.
#[derive(Clone)]
pub struct GcsBlobStore {
    client: Client,
}

impl GcsBlobStore {
    pub async fn new() -> Result<Self> {
        let cfg = ClientConfig::default()
            .with_auth()
            .await
            .context("authenticating to GCS")?;
        Ok(Self {
            client: Client::new(cfg),
        })
    }
}

fn get_request(bucket: &str, key: &str) -> GetObjectRequest {
    GetObjectRequest {
        bucket: bucket.to_string(),
        object: key.to_string(),
        ..Default::default()
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        match self.client.get_object(&get_request(bucket, key)).await {
            Ok(_) => Ok(true),
            Err(GcsError::Response(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(e).with_context(|| format!("stat gs://{}/{}", bucket, key)),
        }
    }

    async fn download(&self, bucket: &str, key: &str, dst: &Path) -> Result<u64> {
        let mut stream = self
            .client
            .download_streamed_object(&get_request(bucket, key), &Range::default())
            .await
            .with_context(|| format!("opening gs://{}/{}", bucket, key))?;

        let mut file = File::create(dst)
            .await
            .with_context(|| format!("creating {}", dst.display()))?;
        let mut total = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("reading gs://{}/{}", bucket, key))?;
            file.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        debug!(bucket, key, bytes = total, "downloaded");
        Ok(total)
    }

    async fn upload(&self, src: &Path, bucket: &str, key: &str) -> Result<u64> {
        // open the file, grab its length
        let file = File::open(src)
            .await
            .with_context(|| format!("opening {}", src.display()))?;
        let len = file.metadata().await?.len();

        let mut media = Media::new(key.to_string());
        media.content_length = Some(len);
        let req = UploadObjectRequest {
            bucket: bucket.to_string(),
            ..Default::default()
        };

        // streaming upload (no full buffering)
        self.client
            .upload_object(&req, file, &UploadType::Simple(media))
            .await
            .with_context(|| format!("uploading {} to gs://{}/{}", src.display(), bucket, key))?;

        info!(bucket, key, bytes = len, "uploaded");
        Ok(len)
    }
}
