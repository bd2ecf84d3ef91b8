// src/validate/inspector.rs

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};
use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
    rc::Rc,
};
use tracing::{debug, warn};

use super::{Report, Validator, Violation, ViolationCode};
use crate::schema::{Field, FieldType};

/// Streaming CSV conformance checker.
///
/// Rows are numbered by the physical line they start on, blank lines and
/// quoted newlines included, so coordinates line up with the line-based
/// correction pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableInspector;

/// Records the byte offset of every `\n` that passes through.
struct NewlineTap<R> {
    inner: R,
    offset: u64,
    newlines: Rc<RefCell<VecDeque<u64>>>,
}

impl<R: Read> Read for NewlineTap<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        let mut newlines = self.newlines.borrow_mut();
        for (i, b) in buf[..n].iter().enumerate() {
            if *b == b'\n' {
                newlines.push_back(self.offset + i as u64);
            }
        }
        self.offset += n as u64;
        Ok(n)
    }
}

/// Physical line numbers for record start offsets, which must be fed in order.
struct LineCounter {
    newlines: Rc<RefCell<VecDeque<u64>>>,
    passed: u64,
}

impl LineCounter {
    fn line_at(&mut self, byte: u64) -> u64 {
        let mut newlines = self.newlines.borrow_mut();
        while newlines.front().is_some_and(|&nl| nl < byte) {
            newlines.pop_front();
            self.passed += 1;
        }
        self.passed + 1
    }
}

/// Empty cells are null and always conform.
pub fn conforms(ty: FieldType, value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    match ty {
        FieldType::String => true,
        FieldType::Integer => value.parse::<i64>().is_ok(),
        FieldType::Number => value.parse::<f64>().map(f64::is_finite).unwrap_or(false),
        FieldType::Year => value.len() == 4 && value.bytes().all(|b| b.is_ascii_digit()),
    }
}

fn push(errors: &mut Vec<Violation>, row: u64, col: usize, code: ViolationCode, message: String) {
    errors.push(Violation {
        row_number: row,
        column_number: col,
        message,
        code: Some(code),
    });
}

fn check_header(header: &StringRecord, fields: &[Field], errors: &mut Vec<Violation>) {
    let mut seen: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, name) in header.iter().enumerate() {
        let col = i + 1;
        if name.trim().is_empty() {
            push(
                errors,
                1,
                col,
                ViolationCode::BlankHeader,
                format!("Header in column {} is blank", col),
            );
            continue;
        }
        let earlier = seen.entry(name).or_default();
        if !earlier.is_empty() {
            let cols = earlier
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            push(
                errors,
                1,
                col,
                ViolationCode::DuplicateHeader,
                format!("Header in column {} is duplicated to header in column(s) {}", col, cols),
            );
        }
        earlier.push(col);

        match fields.get(i) {
            Some(f) if f.name == name => {}
            Some(f) => push(
                errors,
                1,
                col,
                ViolationCode::NonMatchingHeader,
                format!(
                    "Header in column {} doesn't match field name {} in the schema",
                    col, f.name
                ),
            ),
            None => push(
                errors,
                1,
                col,
                ViolationCode::NonMatchingHeader,
                format!("Header in column {} has no field in the schema", col),
            ),
        }
    }
}

fn check_row(row: u64, record: &StringRecord, fields: &[Field], errors: &mut Vec<Violation>) {
    if record.iter().all(str::is_empty) {
        push(
            errors,
            row,
            1,
            ViolationCode::BlankRow,
            format!("Row {} is completely blank", row),
        );
        return;
    }

    for (i, value) in record.iter().enumerate() {
        let col = i + 1;
        match fields.get(i) {
            None => push(
                errors,
                row,
                col,
                ViolationCode::ExtraValue,
                format!("Row {} has an extra value in column {}", row, col),
            ),
            Some(f) if !conforms(f.ty, value) => push(
                errors,
                row,
                col,
                ViolationCode::TypeOrFormatError,
                format!(
                    "The value {} in row {} and column {} is not type {} and format default",
                    value, row, col, f.ty
                ),
            ),
            Some(_) => {}
        }
    }

    for col in record.len() + 1..=fields.len() {
        push(
            errors,
            row,
            col,
            ViolationCode::MissingValue,
            format!("Row {} has a missing value in column {}", row, col),
        );
    }
}

impl Validator for TableInspector {
    fn inspect(&self, path: &Path, fields: &[Field], row_limit: u64) -> Result<Report> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let newlines = Rc::new(RefCell::new(VecDeque::new()));
        let mut lines = LineCounter {
            newlines: newlines.clone(),
            passed: 0,
        };
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(NewlineTap {
                inner: BufReader::with_capacity(1 << 20, file),
                offset: 0,
                newlines,
            });

        let mut errors = Vec::new();
        let mut record = StringRecord::new();
        if !reader.read_record(&mut record)? {
            warn!(path = %path.display(), "nothing to validate: file is empty");
            return Ok(Report::default());
        }
        check_header(&record, fields, &mut errors);

        let mut rows = 0u64;
        while rows < row_limit {
            if !reader
                .read_record(&mut record)
                .with_context(|| format!("reading {} after {} rows", path.display(), rows))?
            {
                break;
            }
            rows += 1;
            let line = match record.position() {
                Some(pos) => lines.line_at(pos.byte()),
                None => rows + 1,
            };
            check_row(line, &record, fields, &mut errors);
        }
        if rows == row_limit && reader.read_record(&mut record)? {
            warn!(path = %path.display(), row_limit, "row limit reached; remaining rows not checked");
        }

        debug!(path = %path.display(), rows, errors = errors.len(), "inspected");
        Ok(Report {
            error_count: errors.len(),
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::schema;
    use std::fs;
    use tempfile::tempdir;

    const HEADER: &str = "company,zip,employees,sales,archive_year\n";

    fn inspect(body: &str) -> Result<Report> {
        let dir = tempdir()?;
        let path = dir.path().join("conv.csv");
        fs::write(&path, body)?;
        let fields = schema().resolve(1997)?;
        TableInspector.inspect(&path, &fields, 100_000_000)
    }

    fn codes(report: &Report) -> Vec<(u64, usize, ViolationCode)> {
        report
            .errors
            .iter()
            .map(|v| (v.row_number, v.column_number, v.code.unwrap()))
            .collect()
    }

    #[test]
    fn clean_file_has_no_errors() -> Result<()> {
        let report = inspect(&format!(
            "{HEADER}ACME,01001,12,350.5,1997\n\"SMITH, J\",,,,1997\n"
        ))?;
        assert_eq!(report, Report::default());
        Ok(())
    }

    #[test]
    fn type_errors_are_located() -> Result<()> {
        let report = inspect(&format!(
            "{HEADER}ACME,01001,12,350.5,1997\nBETA,01002,@12,x,97\n"
        ))?;
        assert_eq!(report.error_count, 3);
        assert_eq!(
            codes(&report),
            vec![
                (3, 3, ViolationCode::TypeOrFormatError),
                (3, 4, ViolationCode::TypeOrFormatError),
                (3, 5, ViolationCode::TypeOrFormatError),
            ]
        );
        assert_eq!(
            report.errors[0].message,
            "The value @12 in row 3 and column 3 is not type integer and format default"
        );
        Ok(())
    }

    #[test]
    fn header_problems() -> Result<()> {
        let report = inspect("company,company,,sales,archive_year,extra\n")?;
        assert_eq!(
            codes(&report),
            vec![
                (1, 2, ViolationCode::DuplicateHeader),
                (1, 2, ViolationCode::NonMatchingHeader),
                (1, 3, ViolationCode::BlankHeader),
                (1, 6, ViolationCode::NonMatchingHeader),
            ]
        );
        Ok(())
    }

    #[test]
    fn shape_problems() -> Result<()> {
        let report = inspect(&format!("{HEADER},,,,\nA,1,2,3,1997,X\nB,1,2\n"))?;
        assert_eq!(
            codes(&report),
            vec![
                (2, 1, ViolationCode::BlankRow),
                (3, 6, ViolationCode::ExtraValue),
                (4, 4, ViolationCode::MissingValue),
                (4, 5, ViolationCode::MissingValue),
            ]
        );
        Ok(())
    }

    #[test]
    fn rows_are_physical_lines() -> Result<()> {
        // a quoted newline and a blank line each push later rows down a line
        let report = inspect(&format!(
            "{HEADER}\"MULTI\nLINE\",1,1,1,1997\nB,1,x,1,1997\n\nC,1,y,1,1997\n"
        ))?;
        let at: Vec<(u64, usize)> = report
            .errors
            .iter()
            .map(|v| (v.row_number, v.column_number))
            .collect();
        assert_eq!(at, vec![(4, 3), (6, 3)]);
        Ok(())
    }

    #[test]
    fn row_limit_stops_early() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("conv.csv");
        fs::write(&path, format!("{HEADER}A,1,1,1,1997\nB,1,x,1,1997\n"))?;
        let fields = schema().resolve(1997)?;
        assert_eq!(TableInspector.inspect(&path, &fields, 1)?.error_count, 0);
        assert_eq!(TableInspector.inspect(&path, &fields, 2)?.error_count, 1);
        Ok(())
    }

    #[test]
    fn type_rules() {
        assert!(conforms(FieldType::Integer, "-42"));
        assert!(!conforms(FieldType::Integer, "4.2"));
        assert!(conforms(FieldType::Number, "042.05636"));
        assert!(!conforms(FieldType::Number, "NaN"));
        assert!(conforms(FieldType::Year, "1997"));
        assert!(!conforms(FieldType::Year, "97"));
        assert!(conforms(FieldType::String, "@anything"));
        assert!(conforms(FieldType::Integer, ""));
    }
}
