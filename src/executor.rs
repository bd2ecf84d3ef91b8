// src/executor.rs

use anyhow::Result;
use futures::future::join_all;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc, time::Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::config::PipelineConfig;
use crate::convert::convert;
use crate::correct::correct;
use crate::fetch::fetch;
use crate::publish::{publish_data, publish_report};
use crate::schema::SchemaDocument;
use crate::stage::{Outcome, Stage};
use crate::storage::BlobStore;
use crate::validate::{validate, Validator};

/// Everything a stage task may touch. Shared read-only by all tasks.
pub struct StageContext {
    pub cfg: PipelineConfig,
    pub schema: Arc<SchemaDocument>,
    pub store: Arc<dyn BlobStore>,
    pub validator: Arc<dyn Validator>,
}

/// One unit of work: a stage applied to a year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageTask {
    pub stage: Stage,
    pub year: i32,
}

impl StageTask {
    pub async fn run(self, ctx: &StageContext) -> Result<Outcome> {
        let StageTask { stage, year } = self;
        match stage {
            Stage::Fetch => fetch(&ctx.cfg, ctx.store.as_ref(), year).await,
            Stage::Convert => convert(&ctx.cfg, ctx.schema.clone(), year).await,
            Stage::Validate => {
                validate(&ctx.cfg, ctx.schema.clone(), ctx.validator.clone(), year).await
            }
            Stage::Correct => correct(&ctx.cfg, year).await,
            Stage::PublishData => publish_data(&ctx.cfg, ctx.store.as_ref(), year).await,
            Stage::PublishReport => publish_report(&ctx.cfg, ctx.store.as_ref(), year).await,
        }
    }
}

/// Per-year results of one stage batch.
#[derive(Debug)]
pub struct StageResults {
    pub stage: Stage,
    pub outcomes: BTreeMap<i32, Result<Outcome>>,
}

impl StageResults {
    pub fn succeeded(&self) -> Vec<i32> {
        self.outcomes
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(y, _)| *y)
            .collect()
    }

    pub fn failed(&self) -> Vec<i32> {
        self.outcomes
            .iter()
            .filter(|(_, r)| r.is_err())
            .map(|(y, _)| *y)
            .collect()
    }

    pub fn error(&self, year: i32) -> Option<&anyhow::Error> {
        self.outcomes.get(&year).and_then(|r| r.as_ref().err())
    }
}

/// Run `stage` for every year, at most `workers` at a time, and wait for the
/// whole batch. A failed year is logged and never stops its siblings.
pub async fn run_stage(ctx: Arc<StageContext>, stage: Stage, years: &[i32]) -> StageResults {
    info!(stage = %stage, years = years.len(), "{}", stage.describe());
    let start = Instant::now();
    let sem = Arc::new(Semaphore::new(ctx.cfg.workers.max(1)));

    let handles = years
        .iter()
        .map(|&year| {
            let ctx = ctx.clone();
            let sem = sem.clone();
            let task = StageTask { stage, year };
            tokio::spawn(async move {
                let _permit = sem.acquire_owned().await?;
                task.run(&ctx).await
            })
        })
        .collect::<Vec<_>>();

    let mut outcomes = BTreeMap::new();
    for (&year, joined) in years.iter().zip(join_all(handles).await) {
        let res = match joined {
            Ok(res) => res,
            Err(e) => Err(anyhow::anyhow!("task panicked: {}", e)),
        };
        match &res {
            Ok(outcome) => debug!(stage = %stage, year, path = ?outcome.path(), "task done"),
            Err(e) => error!(stage = %stage, year, error = %format!("{:#}", e), "task failed"),
        }
        outcomes.insert(year, res);
    }

    let results = StageResults { stage, outcomes };
    info!(
        stage = %stage,
        ok = results.succeeded().len(),
        failed = results.failed().len(),
        elapsed = ?start.elapsed(),
        "stage finished"
    );
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Artifact;
    use crate::storage::LocalBlobStore;
    use crate::testutil::schema;
    use crate::validate::TableInspector;
    use tempfile::tempdir;

    #[tokio::test]
    async fn failures_stay_with_their_year() -> Result<()> {
        let dir = tempdir()?;
        let cfg = PipelineConfig {
            work_dir: dir.path().join("work"),
            workers: 2,
            ..PipelineConfig::test()
        };
        let store = LocalBlobStore::new(dir.path().join("blobs"));
        for year in [1997, 1999] {
            let remote = store.path(&cfg.bucket_orig, &cfg.raw_key(year));
            std::fs::create_dir_all(remote.parent().unwrap())?;
            std::fs::write(&remote, "Company\n")?;
        }
        let ctx = Arc::new(StageContext {
            cfg,
            schema: schema(),
            store: Arc::new(store),
            validator: Arc::new(TableInspector),
        });

        let results = run_stage(ctx.clone(), Stage::Fetch, &[1997, 1998, 1999]).await;
        assert_eq!(results.succeeded(), vec![1997, 1999]);
        assert_eq!(results.failed(), vec![1998]);
        assert!(results.error(1998).is_some());
        assert!(ctx.cfg.artifact(Artifact::Raw, 1999).exists());
        Ok(())
    }
}
