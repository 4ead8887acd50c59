//! # Document Ingest
//!
//! Turns document sources (CSV/TSV/XLSX) into scratch-database tables so
//! every query ultimately runs against a SQL engine:
//!
//! ```text
//! open file → sample rows → detect header → detect column kinds
//!     → CREATE TABLE in scratch → batch insert (munged values)
//! ```
//!
//! ## Header detection
//!
//! The kind vector computed over rows `0..` is compared with the vector
//! over rows `1..`: if dropping the first row changes the column kinds,
//! that row is a header. Ragged rows compare only the common prefix.
//! Sheets/files with fewer than two rows are treated as data-only, and an
//! explicit header option overrides detection entirely.
//!
//! ## Ragged rows
//!
//! Real spreadsheets have ragged edges. The table is sized to the widest
//! sampled row; missing cells ingest as NULL, and columns past the header
//! get spreadsheet-style names (A, B, …, AA).

use crate::cancel::CancelToken;
use crate::driver::{Database, TableDef};
use crate::error::SqError;
use crate::kind::{Detector, Kind, MungeFn};
use crate::options::{Options, DEFAULT_SAMPLE_SIZE, OPT_INGEST_HEADER, OPT_INGEST_NO_CACHE, OPT_INGEST_SAMPLE_SIZE};
use crate::record::batch::BatchInsert;
use crate::record::meta::munge_result_col_names;
use crate::record::{Record, Value};
use calamine::{Data, Reader, Xlsx};
use eyre::{Result, WrapErr};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Rows per INSERT while ingesting.
const INGEST_BATCH_ROWS: usize = 250;

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub sample_size: usize,
    /// Explicit header override; `None` means auto-detect.
    pub header: Option<bool>,
    pub no_cache: bool,
}

impl IngestOptions {
    pub fn from_options(opts: &Options) -> Self {
        IngestOptions {
            sample_size: opts.get_int(OPT_INGEST_SAMPLE_SIZE, DEFAULT_SAMPLE_SIZE).max(1)
                as usize,
            header: opts.get_bool(OPT_INGEST_HEADER),
            no_cache: opts.get_bool(OPT_INGEST_NO_CACHE).unwrap_or(false),
        }
    }
}

/// Compares the column-kind vectors with and without the first row. A
/// difference means row 0 is a header.
pub fn detect_header_row(sample: &[Vec<Value>]) -> bool {
    if sample.len() < 2 {
        return false;
    }

    let (kinds_all, _) = detect_col_kinds(sample, 0);
    let (kinds_data, _) = detect_col_kinds(sample, 1);

    let common = kinds_all.len().min(kinds_data.len());
    kinds_all[..common] != kinds_data[..common]
}

/// Per-column kind detection over `rows[range_start..]`, growing the
/// detector set as wider rows appear. All-empty rows are skipped.
pub fn detect_col_kinds(
    rows: &[Vec<Value>],
    range_start: usize,
) -> (Vec<Kind>, Vec<Option<MungeFn>>) {
    let mut detectors: Vec<Detector> = Vec::new();

    for row in rows.iter().skip(range_start) {
        if row.iter().all(|v| match v {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }) {
            continue;
        }

        for _ in detectors.len()..row.len() {
            detectors.push(Detector::new());
        }
        for (j, val) in row.iter().enumerate() {
            detectors[j].sample(val);
        }
    }

    let mut kinds = Vec::with_capacity(detectors.len());
    let mut munges = Vec::with_capacity(detectors.len());
    for d in &detectors {
        let (kind, munge) = d.detect();
        kinds.push(kind);
        munges.push(munge);
    }
    (kinds, munges)
}

/// Spreadsheet-style column name: 0 → A, 25 → Z, 26 → AA.
pub fn col_letters(mut i: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (i % 26) as u8);
        if i < 26 {
            break;
        }
        i = i / 26 - 1;
    }
    out.reverse();
    String::from_utf8(out).expect("ascii")
}

/// Column names from an optional header row: blank or missing header
/// cells get letter names; duplicates are munged unique.
fn col_names(header: Option<&[Value]>, width: usize) -> Vec<String> {
    let base: Vec<String> = (0..width)
        .map(|i| {
            let from_header = header.and_then(|h| h.get(i)).and_then(|v| match v {
                Value::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Null => None,
                Value::Text(_) => None,
                other => Some(other.render()),
            });
            from_header.unwrap_or_else(|| col_letters(i))
        })
        .collect();

    let refs: Vec<&str> = base.iter().map(String::as_str).collect();
    munge_result_col_names(&refs)
}

/// Ingests a CSV/TSV file into the scratch table `data`.
pub fn ingest_csv(
    path: &Path,
    delimiter: u8,
    opts: IngestOptions,
    scratch: &Arc<Database>,
    cancel: &CancelToken,
) -> Result<()> {
    let rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_path(path)
        .map_err(|e| SqError::io(format!("open {}: {e}", path.display())))?;
    let mut records = rdr.into_records();

    // Sample for header/kind detection.
    let mut sample: Vec<Vec<Value>> = Vec::new();
    for rec in records.by_ref() {
        let rec = rec.map_err(|e| SqError::invalid_source(format!("malformed csv: {e}")))?;
        sample.push(rec.iter().map(|s| Value::Text(s.to_string())).collect());
        if sample.len() >= opts.sample_size {
            break;
        }
    }
    if sample.is_empty() {
        return Err(SqError::invalid_source(format!(
            "empty data source: {}",
            path.display()
        ))
        .into());
    }

    let has_header = opts.header.unwrap_or_else(|| detect_header_row(&sample));
    let data_start = usize::from(has_header);
    let width = sample.iter().map(Vec::len).max().unwrap_or(0);
    let names = col_names(has_header.then(|| sample[0].as_slice()), width);
    let (mut kinds, mut munges) = detect_col_kinds(&sample, data_start);
    kinds.resize(width, Kind::Unknown);
    munges.resize(width, None);

    debug!(
        path = %path.display(),
        cols = width,
        header = has_header,
        "ingest csv"
    );

    create_ingest_table(scratch, "data", &names, &kinds)?;

    let mut bi = BatchInsert::new(
        scratch.clone(),
        "data",
        names,
        INGEST_BATCH_ROWS,
        cancel.clone(),
    );

    let mut row_num = data_start as u64;
    for row in sample.iter().skip(data_start) {
        bi.send(munge_row("data", row, width, &munges, row_num)?)?;
        row_num += 1;
    }
    for rec in records {
        cancel.check()?;
        let rec = rec.map_err(|e| SqError::invalid_source(format!("malformed csv: {e}")))?;
        let row: Vec<Value> = rec.iter().map(|s| Value::Text(s.to_string())).collect();
        bi.send(munge_row("data", &row, width, &munges, row_num)?)?;
        row_num += 1;
    }

    let inserted = bi.finish()?;
    debug!(inserted, "csv ingest complete");
    Ok(())
}

/// Ingests every sheet of an XLSX workbook, one scratch table per sheet.
pub fn ingest_xlsx(
    path: &Path,
    opts: IngestOptions,
    scratch: &Arc<Database>,
    cancel: &CancelToken,
) -> Result<()> {
    let file = std::fs::File::open(path)
        .map_err(|e| SqError::io(format!("open {}: {e}", path.display())))?;
    let mut wb = Xlsx::new(std::io::BufReader::new(file))
        .map_err(|e| SqError::invalid_source(format!("not an xlsx workbook: {e}")))?;

    let sheet_names = wb.sheet_names().to_vec();
    for sheet in sheet_names {
        cancel.check()?;
        let range = wb
            .worksheet_range(&sheet)
            .map_err(|e| SqError::io(format!("read sheet {sheet}: {e}")))?;

        let rows: Vec<Vec<Value>> = range
            .rows()
            .map(|r| r.iter().map(cell_to_value).collect())
            .collect();
        if rows.is_empty() {
            debug!(sheet, "skipping empty sheet");
            continue;
        }

        let sample = &rows[..rows.len().min(opts.sample_size)];
        let has_header = opts.header.unwrap_or_else(|| detect_header_row(sample));
        let data_start = usize::from(has_header);
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let names = col_names(has_header.then(|| rows[0].as_slice()), width);
        let (mut kinds, mut munges) = detect_col_kinds(sample, data_start);
        kinds.resize(width, Kind::Unknown);
        munges.resize(width, None);

        let tbl = table_name_for_sheet(&sheet);
        debug!(sheet, tbl, cols = width, header = has_header, "ingest sheet");

        create_ingest_table(scratch, &tbl, &names, &kinds)?;

        let mut bi = BatchInsert::new(
            scratch.clone(),
            &tbl,
            names,
            INGEST_BATCH_ROWS,
            cancel.clone(),
        );
        for (i, row) in rows.iter().enumerate().skip(data_start) {
            cancel.check()?;
            bi.send(munge_row(&tbl, row, width, &munges, i as u64)?)?;
        }
        let inserted = bi.finish().wrap_err_with(|| format!("sheet {sheet}"))?;
        debug!(sheet, inserted, "sheet ingest complete");
    }

    Ok(())
}

fn create_ingest_table(
    scratch: &Database,
    tbl: &str,
    names: &[String],
    kinds: &[Kind],
) -> Result<()> {
    let def = TableDef::from_kinds(tbl, names, kinds);
    scratch.with_conn(|drvr, conn| {
        drvr.drop_table(conn, tbl, true)?;
        drvr.create_table(conn, &def)
    })
}

/// Converts one raw row into a record of `width` values: missing cells
/// become NULL, present cells pass through their column's munge function.
/// Coercion failures are tagged with destination table, column, and row.
fn munge_row(
    tbl: &str,
    row: &[Value],
    width: usize,
    munges: &[Option<MungeFn>],
    row_num: u64,
) -> Result<Record> {
    let mut rec = Vec::with_capacity(width);
    for i in 0..width {
        let raw = row.get(i).cloned().unwrap_or(Value::Null);
        let val = match munges.get(i).copied().flatten() {
            Some(munge) => munge(&raw).map_err(|e| {
                SqError::type_mismatch(format!(
                    "table \"{tbl}\", column {}, row {row_num}: {e}",
                    i + 1
                ))
            })?,
            None => raw,
        };
        rec.push(val);
    }
    Ok(rec)
}

fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) => Value::Text(s.clone()),
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ndt) => Value::Datetime(chrono::TimeZone::from_utc_datetime(&chrono::Utc, &ndt)),
            None => Value::Float(dt.as_f64()),
        },
        Data::DateTimeIso(s) => match crate::kind::parse_datetime(s) {
            Some(dt) => Value::Datetime(dt),
            None => Value::Text(s.clone()),
        },
        Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(e) => Value::Text(format!("#ERR:{e:?}")),
    }
}

fn table_name_for_sheet(sheet: &str) -> String {
    let mut name: String = sheet
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if name.is_empty() || name.as_bytes()[0].is_ascii_digit() {
        name.insert(0, 's');
    }
    name
}
