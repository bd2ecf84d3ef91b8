// src/config.rs

use serde::Serialize;
use std::{path::PathBuf, time::Duration};

/// Years published by the directory vendor.
pub const DEFAULT_YEARS: std::ops::RangeInclusive<i32> = 1997..=2015;

/// Year whose converted file receives synthetic bad rows in a test run.
pub const TEST_INJECTION_YEAR: i32 = 1997;

/// Production writes to the real namespace; test runs are isolated under `test/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Production,
    Test,
}

/// Local per-year artifacts, one directory each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Artifact {
    /// Raw vendor extract as fetched.
    Raw,
    /// UTF-8, renamed header, re-padded.
    Converted,
    /// JSON violation list.
    Report,
    /// Converted file with flagged cells blanked.
    Corrected,
}

impl Artifact {
    pub const ALL: [Artifact; 4] = [
        Artifact::Raw,
        Artifact::Converted,
        Artifact::Report,
        Artifact::Corrected,
    ];

    fn dir(&self) -> &'static str {
        match self {
            Artifact::Raw => "orig",
            Artifact::Converted => "conv",
            Artifact::Report => "err",
            Artifact::Corrected => "corr",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            Artifact::Report => "json",
            _ => "csv",
        }
    }
}

/// Everything a stage needs to know about where things live.
/// Built once at startup and never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub mode: Mode,
    pub years: Vec<i32>,
    /// Root of all local artifacts.
    pub work_dir: PathBuf,
    pub schema_path: PathBuf,
    /// `""` in production, `"test/"` in test mode.
    pub namespace: String,
    pub bucket_orig: String,
    pub blob_orig: String,
    pub bucket_corr: String,
    pub blob_corr: String,
    pub blob_err: String,
    pub project: Option<String>,
    pub dataset: String,
    pub table: String,
    pub workers: usize,
    pub poll_interval: Duration,
    /// Row cap handed to the validator.
    pub row_limit: u64,
    /// Year that receives synthetic bad rows after Convert.
    pub inject_errors: Option<i32>,
}

impl PipelineConfig {
    pub fn production() -> Self {
        Self {
            mode: Mode::Production,
            years: DEFAULT_YEARS.collect(),
            work_dir: PathBuf::from("."),
            schema_path: PathBuf::from("schema.json"),
            namespace: String::new(),
            bucket_orig: "info_group_original".into(),
            blob_orig: "{y}_Business_Academic_QCQ.csv".into(),
            bucket_corr: "info-group-corr".into(),
            blob_corr: "{y}.csv".into(),
            blob_err: "err/{y}.csv".into(),
            project: None,
            dataset: "original".into(),
            table: "data".into(),
            workers: num_cpus::get(),
            poll_interval: Duration::from_secs(1),
            row_limit: 100_000_000,
            inject_errors: None,
        }
    }

    /// Same buckets, every key and local path under `test/`, separate table.
    pub fn test() -> Self {
        Self {
            mode: Mode::Test,
            namespace: "test/".into(),
            table: "test_data".into(),
            inject_errors: Some(TEST_INJECTION_YEAR),
            ..Self::production()
        }
    }

    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Production => Self::production(),
            Mode::Test => Self::test(),
        }
    }

    pub fn is_test(&self) -> bool {
        self.mode == Mode::Test
    }

    /// Directory holding every artifact of one kind.
    pub fn artifact_dir(&self, kind: Artifact) -> PathBuf {
        self.work_dir.join(&self.namespace).join(kind.dir())
    }

    /// Deterministic local path for `(kind, year)`.
    pub fn artifact(&self, kind: Artifact, year: i32) -> PathBuf {
        self.artifact_dir(kind)
            .join(format!("{}.{}", year, kind.extension()))
    }

    pub fn raw_key(&self, year: i32) -> String {
        self.key(&self.blob_orig, year)
    }

    pub fn data_key(&self, year: i32) -> String {
        self.key(&self.blob_corr, year)
    }

    pub fn report_key(&self, year: i32) -> String {
        self.key(&self.blob_err, year)
    }

    /// Warehouse source URI of a year's published data.
    pub fn data_uri(&self, year: i32) -> String {
        format!("gs://{}/{}", self.bucket_corr, self.data_key(year))
    }

    fn key(&self, template: &str, year: i32) -> String {
        format!("{}{}", self.namespace, expand(template, year))
    }
}

/// Replace every `{y}` in `template` with `year`.
pub fn expand(template: &str, year: i32) -> String {
    template.replace("{y}", &year.to_string())
}

/// Years accepted on the command line: four digits, like the archive year column.
pub const YEAR_BOUNDS: std::ops::RangeInclusive<i32> = 1000..=9999;

/// Parse `1997-2015` or `1997,2001,2009` (or a mix) into a sorted, deduplicated list.
pub fn parse_years(spec: &str) -> anyhow::Result<Vec<i32>> {
    let check = |y: i32| -> anyhow::Result<i32> {
        anyhow::ensure!(YEAR_BOUNDS.contains(&y), "year {} is not a four-digit year", y);
        Ok(y)
    };
    let mut years = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((a, b)) => {
                let (a, b) = (check(a.trim().parse()?)?, check(b.trim().parse()?)?);
                anyhow::ensure!(a <= b, "empty year range `{}`", part);
                years.extend(a..=b);
            }
            None => years.push(check(part.parse()?)?),
        }
    }
    anyhow::ensure!(!years.is_empty(), "no years in `{}`", spec);
    years.sort_unstable();
    years.dedup();
    Ok(years)
}
