// src/pipeline.rs

use anyhow::Result;
use std::{collections::BTreeMap, sync::Arc, time::Instant};
use tracing::{error, info, warn};

use crate::executor::{run_stage, StageContext};
use crate::stage::{make_locations, sweep_partials, Stage};
use crate::testmode::inject_errors;
use crate::validate::print_errors;
use crate::warehouse::{load_all, LoadSummary, Warehouse};

/// What one run did.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// `.part` files left by an interrupted run and deleted at startup.
    pub swept: usize,
    /// Years that failed, per stage. A failed year is not offered to later stages.
    pub failed: BTreeMap<Stage, Vec<i32>>,
    /// Years that went through every stage.
    pub completed: Vec<i32>,
    pub injected: usize,
    /// Violation count per validated year.
    pub violations: BTreeMap<i32, usize>,
    pub load: Option<LoadSummary>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.values().all(Vec::is_empty)
            && self
                .load
                .as_ref()
                .map_or(true, |l| l.failed_years().is_empty())
    }
}

/// Run every per-year stage as a barrier-separated batch, then the warehouse load.
///
/// Schema problems and unsupported years fail the whole run before anything
/// is started. The warehouse load only runs once every configured year has
/// been published.
pub async fn run(ctx: Arc<StageContext>, warehouse: Option<&dyn Warehouse>) -> Result<RunSummary> {
    let start = Instant::now();
    let cfg = &ctx.cfg;
    info!(test = cfg.is_test(), years = ?cfg.years, work_dir = %cfg.work_dir.display(), "pipeline started");

    ctx.schema.ensure_years(&cfg.years)?;
    make_locations(cfg)?;
    let mut summary = RunSummary {
        swept: sweep_partials(cfg)?,
        ..Default::default()
    };

    let mut years = cfg.years.clone();
    for stage in Stage::ORDER {
        if years.is_empty() {
            warn!(stage = %stage, "no years left to run");
            break;
        }
        let results = run_stage(ctx.clone(), stage, &years).await;
        let failed = results.failed();
        if !failed.is_empty() {
            summary.failed.insert(stage, failed);
        }
        years = results.succeeded();

        match stage {
            Stage::Convert => {
                if let Some(year) = cfg.inject_errors.filter(|y| years.contains(y)) {
                    let task = ctx.clone();
                    let injected =
                        tokio::task::spawn_blocking(move || inject_errors(&task.cfg, &task.schema, year))
                            .await;
                    match injected.map_err(anyhow::Error::from).and_then(|r| r) {
                        Ok(n) => summary.injected = n,
                        Err(e) => error!(year, error = %format!("{:#}", e), "error injection failed"),
                    }
                }
            }
            Stage::Validate => {
                let task = ctx.clone();
                let batch = years.clone();
                let printed = tokio::task::spawn_blocking(move || {
                    batch
                        .into_iter()
                        .map(|year| (year, print_errors(&task.cfg, &task.schema, year)))
                        .collect::<Vec<_>>()
                })
                .await?;
                for (year, result) in printed {
                    match result {
                        Ok(n) => {
                            summary.violations.insert(year, n);
                        }
                        Err(e) => warn!(year, error = %format!("{:#}", e), "could not print report"),
                    }
                }
            }
            _ => {}
        }
    }
    summary.completed = years;

    match warehouse {
        None => info!("warehouse load disabled"),
        Some(_) if summary.completed.len() != cfg.years.len() => {
            error!(
                completed = summary.completed.len(),
                expected = cfg.years.len(),
                "not every year was published; warehouse load skipped"
            );
        }
        Some(wh) => {
            summary.load = Some(load_all(cfg, &ctx.schema, wh, &summary.completed).await?);
        }
    }

    info!(
        completed = summary.completed.len(),
        clean = summary.is_clean(),
        elapsed = ?start.elapsed(),
        "pipeline finished"
    );
    Ok(summary)
}
