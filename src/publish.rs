// src/publish.rs

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, instrument};

use crate::config::{Artifact, PipelineConfig};
use crate::stage::{Outcome, Stage};
use crate::storage::BlobStore;
use crate::validate::read_report;

/// The local file that stands for a year's final data: the corrected file when
/// validation found anything, the converted file otherwise.
pub fn data_source(cfg: &PipelineConfig, year: i32) -> Result<PathBuf> {
    let errors = read_report(&cfg.artifact(Artifact::Report, year))?;
    Ok(if errors.is_empty() {
        cfg.artifact(Artifact::Converted, year)
    } else {
        cfg.artifact(Artifact::Corrected, year)
    })
}

async fn upload_once(
    stage: Stage,
    store: &dyn BlobStore,
    src: PathBuf,
    bucket: &str,
    key: &str,
) -> Result<Outcome> {
    if store
        .exists(bucket, key)
        .await
        .with_context(|| format!("checking {}/{}", bucket, key))?
    {
        info!(stage = %stage, bucket, key, "already exists");
        return Ok(Outcome::Skipped(src));
    }
    let bytes = store
        .upload(&src, bucket, key)
        .await
        .with_context(|| format!("uploading {} to {}/{}", src.display(), bucket, key))?;
    info!(stage = %stage, bucket, key, bytes, "uploaded");
    Ok(Outcome::Done(src))
}

/// Upload the year's final data file to `{bucket_corr}/{blob_corr}`.
#[instrument(level = "info", skip(cfg, store))]
pub async fn publish_data(cfg: &PipelineConfig, store: &dyn BlobStore, year: i32) -> Result<Outcome> {
    let src = data_source(cfg, year)?;
    upload_once(Stage::PublishData, store, src, &cfg.bucket_corr, &cfg.data_key(year)).await
}

/// Upload the year's violation report to `{bucket_corr}/{blob_err}`.
#[instrument(level = "info", skip(cfg, store))]
pub async fn publish_report(
    cfg: &PipelineConfig,
    store: &dyn BlobStore,
    year: i32,
) -> Result<Outcome> {
    let src = cfg.artifact(Artifact::Report, year);
    upload_once(Stage::PublishReport, store, src, &cfg.bucket_corr, &cfg.report_key(year)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::write_atomic;
    use crate::storage::LocalBlobStore;
    use async_trait::async_trait;
    use std::{
        fs,
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };
    use tempfile::tempdir;

    /// Counts uploads on top of a directory store.
    struct SpyStore {
        inner: LocalBlobStore,
        uploads: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for SpyStore {
        async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
            self.inner.exists(bucket, key).await
        }

        async fn download(&self, bucket: &str, key: &str, dst: &Path) -> Result<u64> {
            self.inner.download(bucket, key, dst).await
        }

        async fn upload(&self, src: &Path, bucket: &str, key: &str) -> Result<u64> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            self.inner.upload(src, bucket, key).await
        }
    }

    fn setup(dir: &Path) -> (PipelineConfig, SpyStore) {
        let cfg = PipelineConfig {
            work_dir: dir.join("work"),
            ..PipelineConfig::test()
        };
        let store = SpyStore {
            inner: LocalBlobStore::new(dir.join("blobs")),
            uploads: AtomicUsize::new(0),
        };
        (cfg, store)
    }

    #[tokio::test]
    async fn clean_year_publishes_converted_file() -> Result<()> {
        let dir = tempdir()?;
        let (cfg, store) = setup(dir.path());
        write_atomic(&cfg.artifact(Artifact::Converted, 1998), b"a,b\n1,2\n")?;
        write_atomic(&cfg.artifact(Artifact::Report, 1998), b"[]")?;

        let out = publish_data(&cfg, &store, 1998).await?;
        assert_eq!(out, Outcome::Done(cfg.artifact(Artifact::Converted, 1998)));
        let remote = store.inner.path(&cfg.bucket_corr, &cfg.data_key(1998));
        assert_eq!(fs::read(remote)?, b"a,b\n1,2\n");
        Ok(())
    }

    #[tokio::test]
    async fn dirty_year_publishes_corrected_file() -> Result<()> {
        let dir = tempdir()?;
        let (cfg, store) = setup(dir.path());
        write_atomic(&cfg.artifact(Artifact::Converted, 1997), b"a,b\n1,x\n")?;
        write_atomic(&cfg.artifact(Artifact::Corrected, 1997), b"a,b\n1,\n")?;
        write_atomic(
            &cfg.artifact(Artifact::Report, 1997),
            br#"[{"row-number": 2, "column-number": 2, "message": "bad"}]"#,
        )?;

        publish_data(&cfg, &store, 1997).await?;
        publish_report(&cfg, &store, 1997).await?;
        let data = store.inner.path(&cfg.bucket_corr, "test/1997.csv");
        let report = store.inner.path(&cfg.bucket_corr, "test/err/1997.csv");
        assert_eq!(fs::read(data)?, b"a,b\n1,\n");
        assert!(fs::read_to_string(report)?.contains("row-number"));
        Ok(())
    }

    #[tokio::test]
    async fn existing_blob_is_not_uploaded_again() -> Result<()> {
        let dir = tempdir()?;
        let (cfg, store) = setup(dir.path());
        write_atomic(&cfg.artifact(Artifact::Converted, 1999), b"a\n1\n")?;
        write_atomic(&cfg.artifact(Artifact::Report, 1999), b"[]")?;

        assert!(matches!(publish_data(&cfg, &store, 1999).await?, Outcome::Done(_)));
        assert!(matches!(publish_data(&cfg, &store, 1999).await?, Outcome::Skipped(_)));
        assert!(matches!(publish_report(&cfg, &store, 1999).await?, Outcome::Done(_)));
        assert!(matches!(publish_report(&cfg, &store, 1999).await?, Outcome::Skipped(_)));
        assert_eq!(store.uploads.load(Ordering::SeqCst), 2);
        Ok(())
    }
}
