// src/testmode.rs

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use std::{collections::HashMap, fs::File, io::BufReader};
use tracing::{info, instrument, warn};

use crate::config::{Artifact, PipelineConfig};
use crate::schema::{FieldType, SchemaDocument};
use crate::stage::PartialFile;

/// Data rows (1-based, after the header) that receive a bad value.
pub const INJECTED_ROWS: [u64; 2] = [1, 2];

const MARK: &str = "@";

/// Corrupt one numeric cell in each of [`INJECTED_ROWS`] of the year's
/// converted file, so Validate and Correct have something to do on a test run.
///
/// Does nothing once the year has a report, or when the cells already carry the mark.
/// Returns how many cells were changed.
#[instrument(level = "info", skip(cfg, schema))]
pub fn inject_errors(cfg: &PipelineConfig, schema: &SchemaDocument, year: i32) -> Result<usize> {
    if cfg.artifact(Artifact::Report, year).exists() {
        info!(year, "report exists; no errors injected");
        return Ok(0);
    }
    let path = cfg.artifact(Artifact::Converted, year);
    let types: HashMap<String, FieldType> = schema
        .resolve(year)?
        .into_iter()
        .map(|f| (f.name, f.ty))
        .collect();

    let input = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(BufReader::new(input));
    let mut record = StringRecord::new();
    if !reader.read_record(&mut record)? {
        warn!(year, path = %path.display(), "empty file; no errors injected");
        return Ok(0);
    }
    let target = record.iter().position(|name| {
        matches!(
            types.get(name),
            Some(FieldType::Integer) | Some(FieldType::Number)
        )
    });
    let Some(target) = target else {
        warn!(year, "no numeric column; no errors injected");
        return Ok(0);
    };

    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(PartialFile::create(&path)?);
    writer.write_record(&record)?;

    let mut changed = 0;
    let mut row = 0u64;
    while reader.read_record(&mut record)? {
        row += 1;
        let hit = INJECTED_ROWS.contains(&row)
            && record.get(target).is_some_and(|c| !c.starts_with(MARK));
        if hit {
            let cells: Vec<String> = record
                .iter()
                .enumerate()
                .map(|(i, c)| if i == target { format!("{MARK}{c}") } else { c.to_string() })
                .collect();
            writer.write_record(&cells)?;
            changed += 1;
        } else {
            writer.write_record(&record)?;
        }
    }

    if changed == 0 {
        // nothing to replace; the partial file is dropped
        return Ok(0);
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing {}: {}", path.display(), e.error()))?
        .commit()?;
    info!(year, cells = changed, column = target + 1, "injected synthetic errors");
    Ok(changed)
}
