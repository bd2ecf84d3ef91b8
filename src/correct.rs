// src/correct.rs

use anyhow::{anyhow, Context, Result};
use csv::{ByteRecord, ReaderBuilder, Terminator, WriterBuilder};
use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
    path::Path,
    time::Instant,
};
use tracing::{info, instrument, warn};

use crate::config::{Artifact, PipelineConfig};
use crate::stage::{already_done, Outcome, PartialFile, Stage};
use crate::validate::{read_report, Violation};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CorrectStats {
    pub lines: u64,
    pub rewritten: u64,
    pub blanked: u64,
    pub skipped: u64,
}

fn parse_line(line: &[u8]) -> Result<Option<ByteRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line);
    let mut record = ByteRecord::new();
    Ok(reader.read_byte_record(&mut record)?.then_some(record))
}

fn to_line(cells: &[&[u8]]) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(cells)?;
    writer
        .into_inner()
        .map_err(|e| anyhow!("serializing corrected line: {}", e.error()))
}

/// Copy `src` to `dst` line by line, blanking every cell named in `errors`.
///
/// Lines are split on raw `\n`, not on CSV record boundaries: a quoted value
/// containing a newline shifts every later row number by one. Lines without
/// violations are copied byte for byte.
pub fn correct_file(src: &Path, dst: &Path, mut errors: Vec<Violation>) -> Result<CorrectStats> {
    errors.sort_by_key(|e| e.row_number);
    let mut pending = errors.into_iter().peekable();

    let input = File::open(src).with_context(|| format!("opening {}", src.display()))?;
    let mut reader = BufReader::with_capacity(1 << 20, input);
    let mut out = PartialFile::create(dst)?;
    let mut stats = CorrectStats::default();
    let mut line = Vec::with_capacity(4096);

    loop {
        line.clear();
        if reader
            .read_until(b'\n', &mut line)
            .with_context(|| format!("reading {} after line {}", src.display(), stats.lines))?
            == 0
        {
            break;
        }
        stats.lines += 1;
        let row = stats.lines;

        if pending.peek().map(|e| e.row_number) != Some(row) {
            out.write_all(&line)?;
            continue;
        }

        let record = parse_line(&line)?;
        let mut cells: Vec<&[u8]> = record.as_ref().map(|r| r.iter().collect()).unwrap_or_default();
        while let Some(err) = pending.next_if(|e| e.row_number == row) {
            match err.column_number.checked_sub(1).filter(|&i| i < cells.len()) {
                Some(i) => {
                    cells[i] = b"";
                    stats.blanked += 1;
                }
                None => {
                    warn!(row, column = err.column_number, "violation outside the row; skipped");
                    stats.skipped += 1;
                }
            }
        }
        if record.is_some() {
            out.write_all(&to_line(&cells)?)?;
            stats.rewritten += 1;
        } else {
            out.write_all(&line)?;
        }
    }

    let left = pending.count() as u64;
    if left > 0 {
        warn!(path = %src.display(), violations = left, lines = stats.lines, "violations beyond the last line");
        stats.skipped += left;
    }
    out.commit()?;
    Ok(stats)
}

/// Correct stage for one year: `conv/{y}.csv` + `err/{y}.json` → `corr/{y}.csv`.
///
/// A year with no violations produces nothing; publish falls back to the converted file.
#[instrument(level = "info", skip(cfg))]
pub async fn correct(cfg: &PipelineConfig, year: i32) -> Result<Outcome> {
    let dst = cfg.artifact(Artifact::Corrected, year);
    if let Some(done) = already_done(Stage::Correct, &dst) {
        return Ok(done);
    }

    let src = cfg.artifact(Artifact::Converted, year);
    let errors = read_report(&cfg.artifact(Artifact::Report, year))?;
    if errors.is_empty() {
        info!(year, path = %src.display(), "0 errors; nothing to correct");
        return Ok(Outcome::Nothing);
    }

    info!(year, violations = errors.len(), "correct started");
    let start = Instant::now();
    let stats = tokio::task::spawn_blocking({
        let dst = dst.clone();
        move || correct_file(&src, &dst, errors)
    })
    .await
    .context("correct task panicked")??;

    info!(
        year,
        lines = stats.lines,
        rewritten = stats.rewritten,
        blanked = stats.blanked,
        skipped = stats.skipped,
        elapsed = ?start.elapsed(),
        "correct finished"
    );
    Ok(Outcome::Done(dst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::write_atomic;
    use std::fs;
    use tempfile::tempdir;

    const INPUT: &str = "c1,c2,c3,c4,c5,c6,c7,c8,c9,c10\n\
                         a,b,c,d,BAD5,f,g,h,BAD9,j\n\
                         \"q, r\",2,3,4,5,6,7,8,9,10\n\
                         x,y,z,,,,,,,\n";

    fn v(row: u64, col: usize) -> Violation {
        Violation {
            row_number: row,
            column_number: col,
            message: "bad".into(),
            code: None,
        }
    }

    fn test_cfg(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            work_dir: dir.to_path_buf(),
            ..PipelineConfig::test()
        }
    }

    #[test]
    fn blanks_flagged_cells_only() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("conv.csv");
        let dst = dir.path().join("corr.csv");
        fs::write(&src, INPUT)?;

        // out of order on purpose
        let stats = correct_file(&src, &dst, vec![v(2, 9), v(2, 5)])?;
        assert_eq!(stats.blanked, 2);
        assert_eq!(stats.rewritten, 1);

        let out = fs::read_to_string(&dst)?;
        let got: Vec<&str> = out.split_inclusive('\n').collect();
        let want: Vec<&str> = INPUT.split_inclusive('\n').collect();
        assert_eq!(got.len(), want.len());
        assert_eq!(got[1], "a,b,c,d,,f,g,h,,j\n");
        for i in [0, 2, 3] {
            assert_eq!(got[i], want[i], "line {}", i + 1);
        }
        Ok(())
    }

    #[test]
    fn quoted_cells_survive_a_rewrite() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("conv.csv");
        let dst = dir.path().join("corr.csv");
        fs::write(&src, INPUT)?;

        correct_file(&src, &dst, vec![v(3, 2)])?;
        let out = fs::read_to_string(&dst)?;
        assert_eq!(out.lines().nth(2), Some("\"q, r\",,3,4,5,6,7,8,9,10"));
        Ok(())
    }

    #[test]
    fn out_of_range_violations_are_skipped() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("conv.csv");
        let dst = dir.path().join("corr.csv");
        fs::write(&src, INPUT)?;

        let stats = correct_file(&src, &dst, vec![v(4, 11), v(40, 1)])?;
        assert_eq!(stats.blanked, 0);
        assert_eq!(stats.skipped, 2);
        // a rewrite of an untouched row keeps its content
        assert_eq!(fs::read_to_string(&dst)?, INPUT);
        Ok(())
    }

    #[test]
    fn inspector_coordinates_survive_blank_and_multiline_rows() -> Result<()> {
        use crate::testutil::schema;
        use crate::validate::{TableInspector, Validator};

        let dir = tempdir()?;
        let src = dir.path().join("conv.csv");
        let dst = dir.path().join("corr.csv");
        let body = "company,zip,employees,sales,archive_year\n\
                    \"MULTI\nLINE\",1,1,1,1997\n\
                    B,1,x,1,1997\n\
                    \n\
                    C,1,y,1,1997\n";
        fs::write(&src, body)?;

        let fields = schema().resolve(1997)?;
        let report = TableInspector.inspect(&src, &fields, 100)?;
        let stats = correct_file(&src, &dst, report.errors)?;
        assert_eq!(stats.blanked, 2);
        assert_eq!(stats.skipped, 0);

        let out = fs::read_to_string(&dst)?;
        assert!(out.contains("B,1,,1,1997\n"), "{out}");
        assert!(out.ends_with("\nC,1,,1,1997\n"), "{out}");
        Ok(())
    }

    #[tokio::test]
    async fn stage_is_idempotent() -> Result<()> {
        let dir = tempdir()?;
        let cfg = test_cfg(dir.path());
        write_atomic(&cfg.artifact(Artifact::Converted, 1997), INPUT.as_bytes())?;
        write_atomic(
            &cfg.artifact(Artifact::Report, 1997),
            &serde_json::to_vec(&vec![v(2, 5)])?,
        )?;

        let dst = cfg.artifact(Artifact::Corrected, 1997);
        assert_eq!(correct(&cfg, 1997).await?, Outcome::Done(dst.clone()));
        let first = fs::read(&dst)?;

        // a different report must not touch existing output
        write_atomic(
            &cfg.artifact(Artifact::Report, 1997),
            &serde_json::to_vec(&vec![v(3, 1)])?,
        )?;
        assert_eq!(correct(&cfg, 1997).await?, Outcome::Skipped(dst.clone()));
        assert_eq!(fs::read(&dst)?, first);
        Ok(())
    }

    #[tokio::test]
    async fn clean_year_produces_nothing() -> Result<()> {
        let dir = tempdir()?;
        let cfg = test_cfg(dir.path());
        write_atomic(&cfg.artifact(Artifact::Converted, 1998), INPUT.as_bytes())?;
        write_atomic(&cfg.artifact(Artifact::Report, 1998), b"[]")?;

        assert_eq!(correct(&cfg, 1998).await?, Outcome::Nothing);
        assert!(!cfg.artifact(Artifact::Corrected, 1998).exists());
        Ok(())
    }
}
