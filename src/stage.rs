// src/stage.rs

use anyhow::{Context, Result};
use glob::glob;
use serde::Serialize;
use std::{
    fmt, fs,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{info, warn};

use crate::config::{Artifact, PipelineConfig};

/// Suffix of in-flight artifacts. Only a completed rename makes an artifact visible.
pub const PART_SUFFIX: &str = ".part";

/// The per-year stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Convert,
    Validate,
    Correct,
    PublishData,
    PublishReport,
}

impl Stage {
    pub const ORDER: [Stage; 6] = [
        Stage::Fetch,
        Stage::Convert,
        Stage::Validate,
        Stage::Correct,
        Stage::PublishData,
        Stage::PublishReport,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Convert => "convert",
            Stage::Validate => "validate",
            Stage::Correct => "correct",
            Stage::PublishData => "upload_corr",
            Stage::PublishReport => "upload_err",
        }
    }

    /// One-line description logged before the stage fans out.
    pub fn describe(&self) -> &'static str {
        match self {
            Stage::Fetch => "Download original data from storage to the local disk.",
            Stage::Convert => {
                "Convert original data to UTF-8, rename header columns, check the archive year \
                 and re-pad fixed-width numbers."
            }
            Stage::Validate => "Validate converted files against the year schema.",
            Stage::Correct => "Blank every cell flagged by validation.",
            Stage::PublishData => "Upload corrected files to storage.",
            Stage::PublishReport => "Upload error reports to storage.",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a stage invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Output was already present; nothing was touched.
    Skipped(PathBuf),
    /// Output was produced by this call.
    Done(PathBuf),
    /// Nothing to produce (e.g. Correct on a clean year).
    Nothing,
}

impl Outcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Outcome::Skipped(p) | Outcome::Done(p) => Some(p),
            Outcome::Nothing => None,
        }
    }
}

/// Log and report an already-present artifact.
pub fn already_done(stage: Stage, path: &Path) -> Option<Outcome> {
    if path.exists() {
        info!(stage = %stage, path = %path.display(), "already exists");
        Some(Outcome::Skipped(path.to_path_buf()))
    } else {
        None
    }
}

/// `<dst>.part`
pub fn part_path(dst: &Path) -> PathBuf {
    let mut s = dst.as_os_str().to_owned();
    s.push(PART_SUFFIX);
    PathBuf::from(s)
}

/// Buffered writer to `<dst>.part`. `commit` renames it over `dst`;
/// dropping it uncommitted deletes the partial file.
pub struct PartialFile {
    dst: PathBuf,
    tmp: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl PartialFile {
    pub fn create<P: AsRef<Path>>(dst: P) -> Result<Self> {
        let dst = dst.as_ref().to_path_buf();
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let tmp = part_path(&dst);
        let file =
            File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        Ok(Self {
            dst,
            tmp,
            writer: Some(BufWriter::with_capacity(1 << 20, file)),
        })
    }

    pub fn tmp_path(&self) -> &Path {
        &self.tmp
    }

    /// Flush, fsync and move into place.
    pub fn commit(mut self) -> Result<PathBuf> {
        let res = self.finish();
        if res.is_err() {
            let _ = fs::remove_file(&self.tmp);
        }
        res
    }

    fn finish(&mut self) -> Result<PathBuf> {
        if let Some(w) = self.writer.take() {
            let file = w
                .into_inner()
                .map_err(|e| e.into_error())
                .with_context(|| format!("flushing {}", self.tmp.display()))?;
            file.sync_all()
                .with_context(|| format!("syncing {}", self.tmp.display()))?;
        }
        fs::rename(&self.tmp, &self.dst).with_context(|| {
            format!("renaming {} -> {}", self.tmp.display(), self.dst.display())
        })?;
        Ok(self.dst.clone())
    }
}

impl Write for PartialFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.writer.as_mut() {
            Some(w) => w.write(buf),
            None => Err(std::io::Error::other("write after commit")),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = fs::remove_file(&self.tmp) {
                warn!(path = %self.tmp.display(), error = %e, "could not remove partial file");
            }
        }
    }
}

/// Write `bytes` to `dst` via a partial file.
pub fn write_atomic(dst: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let mut part = PartialFile::create(dst)?;
    part.write_all(bytes)
        .with_context(|| format!("writing {}", part.tmp_path().display()))?;
    part.commit()
}

/// Create every artifact directory.
pub fn make_locations(cfg: &PipelineConfig) -> Result<()> {
    for kind in Artifact::ALL {
        let dir = cfg.artifact_dir(kind);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    Ok(())
}

/// Delete `.part` leftovers from a killed run. Returns how many were removed.
pub fn sweep_partials(cfg: &PipelineConfig) -> Result<usize> {
    let mut removed = 0;
    for kind in Artifact::ALL {
        let pattern = format!("{}/*{}", cfg.artifact_dir(kind).display(), PART_SUFFIX);
        for entry in glob(&pattern)? {
            let path = entry?;
            fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
            warn!(path = %path.display(), "removed partial artifact from an earlier run");
            removed += 1;
        }
    }
    Ok(removed)
}
