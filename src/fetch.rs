// src/fetch.rs

use anyhow::{Context, Result};
use std::time::Instant;
use tokio::fs;
use tracing::{info, instrument};

use crate::config::{Artifact, PipelineConfig};
use crate::stage::{already_done, part_path, Outcome, Stage};
use crate::storage::BlobStore;

/// Download the year's raw extract to `orig/{y}.csv`.
///
/// An existing local copy is trusted as-is, even if the remote blob changed since.
#[instrument(level = "info", skip(cfg, store))]
pub async fn fetch(cfg: &PipelineConfig, store: &dyn BlobStore, year: i32) -> Result<Outcome> {
    let dst = cfg.artifact(Artifact::Raw, year);
    if let Some(done) = already_done(Stage::Fetch, &dst) {
        return Ok(done);
    }

    info!(year, "fetch started");
    let start = Instant::now();
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    let key = cfg.raw_key(year);
    let tmp = part_path(&dst);
    let bytes = match store.download(&cfg.bucket_orig, &key, &tmp).await {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("fetching {} for {}", key, year));
        }
    };
    fs::rename(&tmp, &dst)
        .await
        .with_context(|| format!("renaming {} -> {}", tmp.display(), dst.display()))?;

    info!(year, bytes, elapsed = ?start.elapsed(), "fetch finished");
    Ok(Outcome::Done(dst))
}
