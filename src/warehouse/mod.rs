//! Destination table creation and per-year bulk loads.

pub mod bigquery;
pub mod schema;

pub use bigquery::BigQueryWarehouse;
pub use schema::{columns, Column, ColumnType};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::{collections::BTreeMap, time::Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::schema::SchemaDocument;

/// Consecutive poll errors tolerated before a year's load is given up on.
pub const MAX_POLL_ERRORS: u32 = 5;

pub const TABLE_DESCRIPTION: &str = "All years in one table.\n\
    In years where certain fields do not exist, corresponding values are NULL.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateDisposition {
    CreateNever,
    CreateIfNeeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    WriteAppend,
    WriteTruncate,
    WriteEmpty,
}

/// One CSV bulk load into an existing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub job_id: String,
    pub table: String,
    pub source_uri: String,
    /// The year's own columns; the rest of the table comes through as NULL.
    pub columns: Vec<Column>,
    pub skip_leading_rows: u32,
    pub create_disposition: CreateDisposition,
    pub write_disposition: WriteDisposition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStatus {
    pub done: bool,
    pub errors: Vec<String>,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool>;
    async fn create_table(&self, table: &str, columns: &[Column], description: &str) -> Result<()>;
    async fn start_bulk_load(&self, req: &LoadRequest) -> Result<JobHandle>;
    async fn poll_job(&self, job: &JobHandle) -> Result<JobStatus>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YearLoad {
    Loaded,
    Failed(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSummary {
    /// Table was already there; nothing was appended.
    TableExisted,
    Finished(BTreeMap<i32, YearLoad>),
}

impl LoadSummary {
    pub fn failed_years(&self) -> Vec<i32> {
        match self {
            LoadSummary::TableExisted => Vec::new(),
            LoadSummary::Finished(m) => m
                .iter()
                .filter(|(_, l)| matches!(l, YearLoad::Failed(_)))
                .map(|(y, _)| *y)
                .collect(),
        }
    }
}

/// Create the destination table from the richest year, then load every year
/// concurrently and wait until each job is done.
///
/// An existing table counts as already loaded: nothing is created or appended.
#[instrument(level = "info", skip(cfg, schema, warehouse))]
pub async fn load_all(
    cfg: &PipelineConfig,
    schema: &SchemaDocument,
    warehouse: &dyn Warehouse,
    years: &[i32],
) -> Result<LoadSummary> {
    if warehouse.table_exists(&cfg.table).await? {
        info!(table = %cfg.table, "table already exists; load skipped");
        return Ok(LoadSummary::TableExisted);
    }

    let richest = schema
        .richest_year(years)?
        .ok_or_else(|| anyhow!("no years to load"))?;
    let table_columns = columns(&schema.resolve(richest)?);
    info!(table = %cfg.table, richest, columns = table_columns.len(), "creating table");
    warehouse
        .create_table(&cfg.table, &table_columns, TABLE_DESCRIPTION)
        .await?;

    let start = Instant::now();
    let mut results = BTreeMap::new();
    let mut running = Vec::with_capacity(years.len());
    for &year in years {
        let req = LoadRequest {
            job_id: Uuid::new_v4().to_string(),
            table: cfg.table.clone(),
            source_uri: cfg.data_uri(year),
            columns: columns(&schema.resolve(year)?),
            skip_leading_rows: 1,
            create_disposition: CreateDisposition::CreateNever,
            write_disposition: WriteDisposition::WriteAppend,
        };
        match warehouse.start_bulk_load(&req).await {
            Ok(job) => {
                info!(year, job = %job.id, source = %req.source_uri, "load started");
                running.push((year, job, 0u32));
            }
            Err(e) => {
                error!(year, error = %e, "could not start load");
                results.insert(year, YearLoad::Failed(vec![format!("{:#}", e)]));
            }
        }
    }

    while !running.is_empty() {
        let mut still = Vec::with_capacity(running.len());
        for (year, job, poll_errors) in running {
            match warehouse.poll_job(&job).await {
                Ok(status) if !status.done => still.push((year, job, 0)),
                Ok(status) if status.errors.is_empty() => {
                    info!(year, job = %job.id, "load finished");
                    results.insert(year, YearLoad::Loaded);
                }
                Ok(status) => {
                    for e in &status.errors {
                        warn!(year, job = %job.id, error = %e, "load job error");
                    }
                    results.insert(year, YearLoad::Failed(status.errors));
                }
                Err(e) if poll_errors + 1 < MAX_POLL_ERRORS => {
                    warn!(year, job = %job.id, attempt = poll_errors + 1, error = %e, "polling load job failed; retrying");
                    still.push((year, job, poll_errors + 1));
                }
                Err(e) => {
                    error!(year, job = %job.id, error = %e, "polling load job failed; giving up");
                    results.insert(year, YearLoad::Failed(vec![format!("{:#}", e)]));
                }
            }
        }
        running = still;
        if !running.is_empty() {
            tokio::time::sleep(cfg.poll_interval).await;
        }
    }

    info!(years = results.len(), elapsed = ?start.elapsed(), "all loads finished");
    Ok(LoadSummary::Finished(results))
}
