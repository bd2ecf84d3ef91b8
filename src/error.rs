// src/error.rs

use std::path::PathBuf;

use thiserror::Error;

/// Problems with the schema document or with a year it cannot describe.
/// These are fatal for the whole run when raised before fan-out.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("reading schema document {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing schema document {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no field list covers year {0}")]
    NoFieldList(i32),

    #[error("field list for years {years:?} references undefined field `{field}`")]
    UndefinedField { field: String, years: Vec<i32> },

    #[error("fixed-width rule for years {years:?} references undefined field `{field}`")]
    UnknownPaddingField { field: String, years: Vec<i32> },

    #[error("fixed-width field `{field}` is not present in the {year} header")]
    PaddingColumnMissing { field: String, year: i32 },

    #[error("unknown field type `{ty}` for field `{field}`")]
    UnknownType { field: String, ty: String },
}

/// Per-year conversion failures. Any of these aborts the year's task and
/// leaves no converted artifact behind.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("column `{column}` has no canonical name in the {year} schema")]
    UnmappedColumn { column: String, year: i32 },

    #[error("row {row}: archive year `{found}` does not match expected {expected}")]
    YearMismatch {
        row: u64,
        expected: i32,
        found: String,
    },

    #[error("archive year column `{column}` missing from the {year} header")]
    MissingArchiveYearColumn { column: String, year: i32 },

    #[error("{0} has no header row")]
    EmptyInput(PathBuf),
}
