// src/convert.rs

use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
    sync::Arc,
    time::Instant,
};
use tracing::{debug, info, instrument};

use crate::config::{Artifact, PipelineConfig};
use crate::error::{ConvertError, SchemaError};
use crate::schema::{rename_map, SchemaDocument};
use crate::stage::{already_done, Outcome, PartialFile, Stage};

/// Forgiving ASCII decoder: bytes outside 7-bit ASCII are dropped, not replaced.
pub struct AsciiFilter<R> {
    inner: R,
}

impl<R: Read> AsciiFilter<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> Read for AsciiFilter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.inner.read(buf)?;
            if n == 0 {
                return Ok(0);
            }
            let mut kept = 0;
            for i in 0..n {
                if buf[i].is_ascii() {
                    buf[kept] = buf[i];
                    kept += 1;
                }
            }
            // a chunk of nothing but high bytes must not look like EOF
            if kept > 0 {
                return Ok(kept);
            }
        }
    }
}

/// Zero-pad an integer cell to `width`. Empty cells stay empty (null);
/// cells that are not integers are left for validation to flag.
pub fn pad_fixed_width(val: &str, width: usize) -> Option<String> {
    if val.is_empty() {
        return None;
    }
    let n: i64 = val.trim().parse().ok()?;
    Some(format!("{:0width$}", n, width = width))
}

/// Header mapping and per-row rules for one year.
struct Plan {
    header: Vec<String>,
    year_idx: usize,
    /// (column index, width)
    pads: Vec<(usize, usize)>,
}

fn plan(schema: &SchemaDocument, year: i32, original: &StringRecord) -> Result<Plan> {
    let fields = schema.resolve(year)?;
    let names = rename_map(&fields);

    let header = original
        .iter()
        .map(|col| {
            names
                .get(col)
                .map(|n| n.to_string())
                .ok_or_else(|| ConvertError::UnmappedColumn {
                    column: col.to_string(),
                    year,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let year_idx = original
        .iter()
        .position(|c| c == schema.archive_year_column)
        .ok_or_else(|| ConvertError::MissingArchiveYearColumn {
            column: schema.archive_year_column.clone(),
            year,
        })?;

    let pads = schema
        .padding_rules(year)
        .into_iter()
        .map(|rule| {
            header
                .iter()
                .position(|h| *h == rule.field)
                .map(|idx| (idx, rule.width))
                .ok_or_else(|| SchemaError::PaddingColumnMissing {
                    field: rule.field.clone(),
                    year,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Plan {
        header,
        year_idx,
        pads,
    })
}

/// Stream `src` into `dst`: ASCII → UTF-8, canonical header, archive year check,
/// fixed-width re-padding. Returns the number of data rows written.
///
/// `dst` only appears once every row has been written; any failure leaves no file.
pub fn convert_file(src: &Path, dst: &Path, year: i32, schema: &SchemaDocument) -> Result<u64> {
    let input = File::open(src).with_context(|| format!("opening {}", src.display()))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(AsciiFilter::new(BufReader::with_capacity(1 << 20, input)));

    let mut record = StringRecord::new();
    if !reader.read_record(&mut record)? {
        return Err(ConvertError::EmptyInput(src.to_path_buf()).into());
    }
    let plan = plan(schema, year, &record)?;

    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(PartialFile::create(dst)?);
    writer.write_record(&plan.header)?;

    let expected = year.to_string();
    let mut rows = 0u64;
    let mut cells: Vec<String> = Vec::new();
    while reader
        .read_record(&mut record)
        .with_context(|| format!("reading {} after row {}", src.display(), rows + 1))?
    {
        rows += 1;
        let found = record.get(plan.year_idx).unwrap_or("");
        if found.trim().parse::<i32>().ok() != Some(year) {
            return Err(ConvertError::YearMismatch {
                // header is row 1
                row: rows + 1,
                expected: year,
                found: found.to_string(),
            }
            .into());
        }

        if plan.pads.is_empty() {
            writer.write_record(&record)?;
        } else {
            cells.clear();
            cells.extend(record.iter().map(str::to_string));
            for &(idx, width) in &plan.pads {
                if let Some(cell) = cells.get_mut(idx) {
                    if let Some(padded) = pad_fixed_width(cell, width) {
                        *cell = padded;
                    }
                }
            }
            writer.write_record(&cells)?;
        }

        if rows % 1_000_000 == 0 {
            debug!(year, rows, "convert progress");
        }
    }
    debug!(year, rows, expected = %expected, "all rows matched archive year");

    let part = writer
        .into_inner()
        .map_err(|e| anyhow!("flushing {}: {}", dst.display(), e.error()))?;
    part.commit()?;
    Ok(rows)
}

/// Convert stage for one year: `orig/{y}.csv` → `conv/{y}.csv`.
#[instrument(level = "info", skip(cfg, schema))]
pub async fn convert(
    cfg: &PipelineConfig,
    schema: Arc<SchemaDocument>,
    year: i32,
) -> Result<Outcome> {
    let dst = cfg.artifact(Artifact::Converted, year);
    if let Some(done) = already_done(Stage::Convert, &dst) {
        return Ok(done);
    }

    info!(year, "convert started");
    let start = Instant::now();
    let src = cfg.artifact(Artifact::Raw, year);
    let rows = tokio::task::spawn_blocking({
        let dst = dst.clone();
        move || convert_file(&src, &dst, year, &schema)
    })
    .await
    .context("convert task panicked")??;

    info!(year, rows, elapsed = ?start.elapsed(), "convert finished");
    Ok(Outcome::Done(dst))
}
