// src/validate/mod.rs

pub mod inspector;

pub use inspector::TableInspector;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path, sync::Arc, time::Instant};
use tracing::{info, instrument};

use crate::config::{Artifact, PipelineConfig};
use crate::schema::{Field, SchemaDocument};
use crate::stage::{already_done, write_atomic, Outcome, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationCode {
    BlankHeader,
    DuplicateHeader,
    NonMatchingHeader,
    BlankRow,
    ExtraValue,
    MissingValue,
    TypeOrFormatError,
}

impl fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationCode::BlankHeader => "blank-header",
            ViolationCode::DuplicateHeader => "duplicate-header",
            ViolationCode::NonMatchingHeader => "non-matching-header",
            ViolationCode::BlankRow => "blank-row",
            ViolationCode::ExtraValue => "extra-value",
            ViolationCode::MissingValue => "missing-value",
            ViolationCode::TypeOrFormatError => "type-or-format-error",
        };
        f.write_str(s)
    }
}

/// One conformance failure. Row and column numbers are 1-based; the header is row 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Violation {
    pub row_number: u64,
    pub column_number: usize,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ViolationCode>,
}

/// What a validator returns for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Report {
    pub error_count: usize,
    pub errors: Vec<Violation>,
}

/// Tabular schema checker. Runs on the blocking pool.
pub trait Validator: Send + Sync {
    fn inspect(&self, path: &Path, fields: &[Field], row_limit: u64) -> Result<Report>;
}

/// Validate stage for one year: `conv/{y}.csv` → `err/{y}.json`.
///
/// Once a report exists it is never recomputed.
#[instrument(level = "info", skip(cfg, schema, validator))]
pub async fn validate(
    cfg: &PipelineConfig,
    schema: Arc<SchemaDocument>,
    validator: Arc<dyn Validator>,
    year: i32,
) -> Result<Outcome> {
    let dst = cfg.artifact(Artifact::Report, year);
    if let Some(done) = already_done(Stage::Validate, &dst) {
        return Ok(done);
    }

    info!(year, "validate started");
    let start = Instant::now();
    let src = cfg.artifact(Artifact::Converted, year);
    let row_limit = cfg.row_limit;
    let report = tokio::task::spawn_blocking(move || -> Result<Report> {
        let fields = schema.resolve(year)?;
        validator.inspect(&src, &fields, row_limit)
    })
    .await
    .context("validate task panicked")??;

    let json = serde_json::to_vec_pretty(&report.errors)?;
    write_atomic(&dst, &json)?;
    info!(year, errors = report.error_count, elapsed = ?start.elapsed(), "validate finished");
    Ok(Outcome::Done(dst))
}

/// Load a persisted violation list.
pub fn read_report(path: &Path) -> Result<Vec<Violation>> {
    let bytes = fs::read(path).with_context(|| format!("reading report {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing report {}", path.display()))
}

/// `Errors in {y}: {n}` followed by one `{field}: {message}` line per violation.
pub fn format_errors(year: i32, errors: &[Violation], fields: &[Field]) -> Vec<String> {
    let mut lines = Vec::with_capacity(errors.len() + 1);
    lines.push(format!("Errors in {}: {}", year, errors.len()));
    for e in errors {
        let name = e
            .column_number
            .checked_sub(1)
            .and_then(|i| fields.get(i))
            .map(|f| f.name.clone())
            .unwrap_or_else(|| format!("column {}", e.column_number));
        lines.push(format!("{}: {}", name, e.message));
    }
    lines
}

/// Print a year's persisted report to stdout.
pub fn print_errors(cfg: &PipelineConfig, schema: &SchemaDocument, year: i32) -> Result<usize> {
    let errors = read_report(&cfg.artifact(Artifact::Report, year))?;
    let fields = schema.resolve(year)?;
    for line in format_errors(year, &errors, &fields) {
        println!("{}", line);
    }
    Ok(errors.len())
}
